// src/gpg.rs

//! OpenPGP encryption layer for packages
//!
//! Packages are encrypted to exactly one recipient certificate using the
//! sequoia-openpgp library (pure Rust implementation). The write side wraps
//! the outermost byte sink so that compressed archive bytes are encrypted;
//! the read side decrypts before any decompression happens.
//!
//! Public keys come from a local file or from an HKP keyserver lookup by
//! identity (usually an email address). Secret keys always come from a local
//! file and are unlocked eagerly, so a wrong passphrase is reported as
//! [`CryptoError::KeyUnlockFailure`] before any package bytes are read.

use crate::error::{CryptoError, Error, FormatError, Result};
use openpgp::cert::CertParser;
use openpgp::crypto::{KeyPair, Password, SessionKey};
use openpgp::packet::{PKESK, SKESK};
use openpgp::parse::stream::{
    DecryptionHelper, Decryptor, DecryptorBuilder, MessageStructure, VerificationHelper,
};
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::serialize::stream::{Encryptor2, LiteralWriter, Message};
use openpgp::types::SymmetricAlgorithm;
use openpgp::{Cert, Fingerprint, KeyHandle};
use reqwest::blocking::Client;
use sequoia_openpgp as openpgp;
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable holding the secret key passphrase
pub const PASSPHRASE_ENV: &str = "PACKER_KEYPASS";

/// Default HKP keyserver for public key lookups
pub const DEFAULT_KEYSERVER: &str = "https://keys.openpgp.org";

/// Timeout for keyserver requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

static POLICY: StandardPolicy = StandardPolicy::new();

/// Where the recipient's public key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A key file on disk (armored or binary)
    File(PathBuf),
    /// An HKP lookup of `identity` on `keyserver`
    Lookup { identity: String, keyserver: String },
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Lookup { identity, keyserver } => write!(f, "'{identity}' on {keyserver}"),
        }
    }
}

/// Where the secret key passphrase comes from
#[derive(Clone, PartialEq, Eq, Default)]
pub enum PassphraseSource {
    /// The passphrase itself, taken from [`PASSPHRASE_ENV`]
    Environment(String),
    /// A file whose trimmed contents are the passphrase
    File(PathBuf),
    /// The key is not protected
    #[default]
    None,
}

impl fmt::Debug for PassphraseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Environment(_) => write!(f, "Environment({PASSPHRASE_ENV})"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::None => write!(f, "None"),
        }
    }
}

impl PassphraseSource {
    /// Resolve the passphrase source: environment first, then file, then none
    pub fn resolve(pass_file: Option<&Path>) -> Self {
        Self::resolve_with(std::env::var(PASSPHRASE_ENV).ok(), pass_file)
    }

    fn resolve_with(env_value: Option<String>, pass_file: Option<&Path>) -> Self {
        match (env_value, pass_file) {
            (Some(value), _) if !value.is_empty() => Self::Environment(value),
            (_, Some(path)) => Self::File(path.to_path_buf()),
            _ => Self::None,
        }
    }

    /// Load the passphrase, if any
    pub fn passphrase(&self) -> Result<Option<Password>> {
        match self {
            Self::Environment(value) => {
                debug!("using key passphrase from {}", PASSPHRASE_ENV);
                Ok(Some(Password::from(value.trim())))
            }
            Self::File(path) => {
                debug!("using key passphrase from {}", path.display());
                let contents = fs::read_to_string(path).map_err(|e| {
                    Error::IoError(format!(
                        "failed to read passphrase file {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(Some(Password::from(contents.trim())))
            }
            Self::None => Ok(None),
        }
    }
}

/// Build the HKP lookup URL for `identity`
pub fn lookup_url(keyserver: &str, identity: &str) -> String {
    format!(
        "{}/pks/lookup?op=get&options=mr&search={}",
        keyserver.trim_end_matches('/'),
        urlencoding::encode(identity)
    )
}

/// Parse the first certificate out of `data`
///
/// Only one recipient is supported; extra certificates are ignored with a
/// warning.
fn first_cert(data: &[u8], origin: &str) -> Result<Cert> {
    let mut certs = CertParser::from_bytes(data)
        .map_err(|e| CryptoError::InvalidKey(format!("{origin}: {e}")))?;

    let cert = match certs.next() {
        Some(Ok(cert)) => cert,
        Some(Err(e)) => return Err(CryptoError::InvalidKey(format!("{origin}: {e}")).into()),
        None => {
            return Err(CryptoError::MissingKeyMaterial(format!("no key found in {origin}")).into());
        }
    };

    if certs.next().is_some() {
        warn!("{} holds more than one key, using {}", origin, cert.fingerprint());
    }
    Ok(cert)
}

/// Fetch a public key from an HKP keyserver
pub fn fetch_public_key(keyserver: &str, identity: &str) -> Result<Cert> {
    let url = lookup_url(keyserver, identity);
    info!("Looking up public key for '{}' on {}", identity, keyserver);

    let lookup_error = |reason: String| CryptoError::KeyLookup {
        identity: identity.to_string(),
        reason,
    };

    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| lookup_error(format!("failed to create HTTP client: {e}")))?;

    let response = client
        .get(&url)
        .send()
        .map_err(|e| lookup_error(e.to_string()))?;

    if !response.status().is_success() {
        return Err(lookup_error(format!("HTTP {}", response.status())).into());
    }

    let body = response
        .bytes()
        .map_err(|e| lookup_error(format!("failed to read response: {e}")))?;

    first_cert(&body, &url)
}

/// Load the recipient certificate from its source
pub fn load_public_key(source: &KeySource) -> Result<Cert> {
    let cert = match source {
        KeySource::File(path) => {
            let data = fs::read(path).map_err(|e| {
                Error::IoError(format!("failed to read key file {}: {e}", path.display()))
            })?;
            first_cert(&data, &path.display().to_string())?
        }
        KeySource::Lookup {
            identity,
            keyserver,
        } => fetch_public_key(keyserver, identity)?,
    };

    info!("Encrypting to key {}", cert.fingerprint());
    Ok(cert)
}

/// Unlocked secret key material for decryption
pub struct DecryptionKeys {
    fingerprint: Fingerprint,
    keypairs: Vec<KeyPair>,
}

impl DecryptionKeys {
    /// Load a secret key file and unlock every secret key in it
    ///
    /// The primary key and all subkeys are unlocked with the same passphrase.
    /// Keys that are not protected are used as they are.
    pub fn load(path: &Path, passphrase: &PassphraseSource) -> Result<Self> {
        let data = fs::read(path).map_err(|e| {
            Error::IoError(format!("failed to read key file {}: {e}", path.display()))
        })?;
        let cert = first_cert(&data, &path.display().to_string())?;
        let password = passphrase.passphrase()?;
        Self::unlock(&cert, password.as_ref())
    }

    /// Unlock the secret keys of `cert`
    pub fn unlock(cert: &Cert, password: Option<&Password>) -> Result<Self> {
        if !cert.is_tsk() {
            return Err(CryptoError::MissingKeyMaterial(format!(
                "key {} has no secret key material",
                cert.fingerprint()
            ))
            .into());
        }

        let mut keypairs = Vec::new();
        for ka in cert.keys().secret() {
            let key = ka.key().clone();
            let fingerprint = key.fingerprint().to_string();

            let key = if key.has_unencrypted_secret() {
                key
            } else {
                let password = password.ok_or_else(|| CryptoError::KeyUnlockFailure {
                    fingerprint: fingerprint.clone(),
                })?;
                key.decrypt_secret(password)
                    .map_err(|_| CryptoError::KeyUnlockFailure {
                        fingerprint: fingerprint.clone(),
                    })?
            };

            let keypair = key
                .into_keypair()
                .map_err(|e| CryptoError::InvalidKey(format!("{fingerprint}: {e}")))?;
            keypairs.push(keypair);
        }

        debug!("unlocked {} secret keys of {}", keypairs.len(), cert.fingerprint());
        Ok(Self {
            fingerprint: cert.fingerprint(),
            keypairs,
        })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl VerificationHelper for DecryptionKeys {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(Vec::new())
    }

    fn check(&mut self, _structure: MessageStructure) -> openpgp::Result<()> {
        // Packages are encrypted, not signed
        Ok(())
    }
}

impl DecryptionHelper for DecryptionKeys {
    fn decrypt<D>(
        &mut self,
        pkesks: &[PKESK],
        _skesks: &[SKESK],
        sym_algo: Option<SymmetricAlgorithm>,
        mut decrypt: D,
    ) -> openpgp::Result<Option<Fingerprint>>
    where
        D: FnMut(SymmetricAlgorithm, &SessionKey) -> bool,
    {
        for pkesk in pkesks {
            for pair in self.keypairs.iter_mut() {
                let recipient = pkesk.recipient();
                if !recipient.is_wildcard() && *recipient != pair.public().keyid() {
                    continue;
                }

                if let Some((algo, session_key)) = pkesk.decrypt(pair, sym_algo) {
                    if decrypt(algo, &session_key) {
                        return Ok(Some(pair.public().fingerprint()));
                    }
                }
            }
        }

        Err(CryptoError::NoDecryptionKey.into())
    }
}

/// Encrypts everything written to it for one recipient
pub struct EncryptingWriter<'a> {
    message: Message<'a>,
}

impl<'a> EncryptingWriter<'a> {
    /// Start an encrypted message on `sink`
    pub fn new<W>(sink: W, recipient: &'a Cert) -> Result<Self>
    where
        W: Write + Send + Sync + 'a,
    {
        let recipients: Vec<_> = recipient
            .keys()
            .with_policy(&POLICY, None)
            .supported()
            .alive()
            .revoked(false)
            .for_transport_encryption()
            .collect();

        if recipients.is_empty() {
            return Err(CryptoError::MissingKeyMaterial(format!(
                "key {} has no usable encryption subkey",
                recipient.fingerprint()
            ))
            .into());
        }

        let message = Message::new(sink);
        let message = Encryptor2::for_recipients(message, recipients)
            .build()
            .map_err(|e| Error::IoError(format!("failed to start encryption: {e}")))?;
        let message = LiteralWriter::new(message)
            .build()
            .map_err(|e| Error::IoError(format!("failed to start encryption: {e}")))?;

        Ok(Self { message })
    }

    /// Write the encryption trailer
    pub fn finish(self) -> Result<()> {
        self.message
            .finalize()
            .map_err(|e| Error::IoError(format!("failed to finish encryption: {e}")))
    }
}

impl Write for EncryptingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.message.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.message.flush()
    }
}

/// Marker carried inside I/O errors raised by [`DecryptingReader`]
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct CiphertextError(String);

/// Recover the ciphertext error tagged onto an I/O error, if any
pub(crate) fn ciphertext_error(err: &io::Error) -> Option<CryptoError> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<CiphertextError>())
        .map(|tagged| CryptoError::MalformedCiphertext(tagged.0.clone()))
}

/// Decrypts an encrypted package stream
pub struct DecryptingReader<'a> {
    inner: Decryptor<'a, DecryptionKeys>,
}

impl<'a> DecryptingReader<'a> {
    /// Start decrypting `source` with `keys`
    ///
    /// An empty source is a malformed package; anything that is not an
    /// OpenPGP message for one of `keys` is a ciphertext error.
    pub fn new<R>(source: R, keys: DecryptionKeys) -> Result<Self>
    where
        R: Read + Send + Sync + 'a,
    {
        let mut source = BufReader::new(source);
        let empty = source
            .fill_buf()
            .map_err(|e| Error::IoError(format!("failed to read package: {e}")))?
            .is_empty();
        if empty {
            return Err(FormatError::MalformedArchive("empty package stream".to_string()).into());
        }

        let fingerprint = keys.fingerprint().clone();
        let inner = DecryptorBuilder::from_reader(source)
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?
            .with_policy(&POLICY, None, keys)
            .map_err(|e| -> Error {
                match e.chain().find_map(|cause| cause.downcast_ref::<CryptoError>()) {
                    Some(crypto) => crypto.clone().into(),
                    None => CryptoError::MalformedCiphertext(e.to_string()).into(),
                }
            })?;

        debug!("decrypting package with key {}", fingerprint);
        Ok(Self { inner })
    }
}

impl Read for DecryptingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            let kind = match e.kind() {
                io::ErrorKind::Other => io::ErrorKind::InvalidData,
                kind => kind,
            };
            io::Error::new(kind, CiphertextError(e.to_string()))
        })
    }
}
