//! # Local Trust Store
//!
//! A directory-backed certificate store laid out as
//! `<root>/<location>/<name>/<THUMBPRINT>.pem`, one PEM certificate per file.
//!
//! Stores are opened through [`TrustStore::open`], which returns an
//! [`OpenStore`] guard. The guard closes when dropped, so every exit path
//! releases it. Adding is a set-union keyed by thumbprint: adding a certificate
//! that is already present changes nothing. Entries are written to a
//! temporary name and hard-linked into place without replacing an existing
//! file, so a concurrent reader never sees a partial certificate and exactly
//! one of several concurrent installs reports the entry as newly added.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = TrustStore::new("/var/lib/certvault/x509stores");
//! let mut root = store.open(StoreName::Root, StoreLocation::CurrentUser, OpenMode::ReadWrite)?;
//! root.add(&decoded)?;
//! let roots = root.root_cert_store()?;
//! ```

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use tracing::{debug, info};

use crate::certificates::{thumbprint, to_pem, DecodedCertificate};
use crate::config::Settings;
use crate::errors::{Error, TrustStoreError};

type Result<T> = std::result::Result<T, TrustStoreError>;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Which logical store to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreName {
    /// Trusted root certification authorities.
    #[default]
    Root,
    /// Intermediate certification authorities.
    CertificateAuthority,
    /// Personal certificates.
    My,
}

impl StoreName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "Root",
            Self::CertificateAuthority => "CA",
            Self::My => "My",
        }
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreName {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "root" => Ok(Self::Root),
            "ca" | "certificateauthority" => Ok(Self::CertificateAuthority),
            "my" | "personal" => Ok(Self::My),
            other => Err(Error::validation_field(
                format!("Unknown store name: {}", other),
                "store_name",
            )),
        }
    }
}

/// Whose store to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreLocation {
    #[default]
    CurrentUser,
    LocalMachine,
}

impl StoreLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentUser => "CurrentUser",
            Self::LocalMachine => "LocalMachine",
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreLocation {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "currentuser" | "user" => Ok(Self::CurrentUser),
            "localmachine" | "machine" => Ok(Self::LocalMachine),
            other => Err(Error::validation_field(
                format!("Unknown store location: {}", other),
                "store_location",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Root of all stores on this machine.
#[derive(Debug, Clone)]
pub struct TrustStore {
    root: PathBuf,
}

impl TrustStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.trust_store_dir.clone().map(Self::new).ok_or(TrustStoreError::UnknownRoot)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: StoreName, location: StoreLocation) -> PathBuf {
        self.root.join(location.as_str()).join(name.as_str())
    }

    /// Open one store. Read-write opens create the directory; read-only opens
    /// of a store that does not exist yet see an empty store.
    pub fn open(
        &self,
        name: StoreName,
        location: StoreLocation,
        mode: OpenMode,
    ) -> Result<OpenStore> {
        let dir = self.path_for(name, location);
        if mode == OpenMode::ReadWrite {
            fs::create_dir_all(&dir)
                .map_err(|source| TrustStoreError::Open { path: dir.clone(), source })?;
        } else if dir.exists() && !dir.is_dir() {
            return Err(TrustStoreError::Open {
                path: dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
            });
        }

        debug!(
            store = %name,
            location = %location,
            mode = ?mode,
            path = %dir.display(),
            "Opened trust store"
        );
        Ok(OpenStore { dir, name, location, mode, open: true })
    }
}

/// A certificate read back from a store.
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub thumbprint: String,
    pub der: CertificateDer<'static>,
    pub path: PathBuf,
}

/// An open store. Closed on drop.
#[derive(Debug)]
pub struct OpenStore {
    dir: PathBuf,
    name: StoreName,
    location: StoreLocation,
    mode: OpenMode,
    open: bool,
}

fn normalize_thumbprint(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn is_entry_name(name: &str) -> bool {
    name.strip_suffix(".pem")
        .map(|stem| stem.len() == 40 && stem.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

impl OpenStore {
    pub fn name(&self) -> StoreName {
        self.name
    }

    pub fn location(&self) -> StoreLocation {
        self.location
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TrustStoreError::Closed)
        }
    }

    fn entry_path(&self, thumbprint: &str) -> PathBuf {
        self.dir.join(format!("{}.pem", thumbprint))
    }

    /// Add the leaf certificate. Returns `true` if it was not already present.
    pub fn add(&mut self, certificate: &DecodedCertificate) -> Result<bool> {
        self.add_der(&certificate.leaf)
    }

    /// Add a DER certificate by thumbprint.
    pub fn add_der(&mut self, der: &CertificateDer<'_>) -> Result<bool> {
        self.ensure_open()?;
        if self.mode == OpenMode::ReadOnly {
            return Err(TrustStoreError::ReadOnly);
        }

        let thumbprint = thumbprint(der.as_ref());
        let target = self.entry_path(&thumbprint);
        if target.exists() {
            debug!(thumbprint = %thumbprint, store = %self.name, "Certificate already present");
            return Ok(false);
        }

        if !write_new(&self.dir, &target, to_pem(der.as_ref()).as_bytes())? {
            debug!(thumbprint = %thumbprint, store = %self.name, "Certificate added concurrently");
            return Ok(false);
        }
        info!(
            thumbprint = %thumbprint,
            store = %self.name,
            location = %self.location,
            "Added certificate to trust store"
        );
        Ok(true)
    }

    /// Certificates whose thumbprint matches. Case, spaces and colons in the
    /// query are ignored.
    pub fn find_by_thumbprint(&self, thumbprint: &str) -> Result<Vec<StoredCertificate>> {
        self.ensure_open()?;
        let wanted = normalize_thumbprint(thumbprint);
        if wanted.len() != 40 {
            return Ok(Vec::new());
        }
        let path = self.entry_path(&wanted);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        Ok(vec![read_entry(&path)?])
    }

    /// Every certificate in the store, ordered by thumbprint.
    pub fn certificates(&self) -> Result<Vec<StoredCertificate>> {
        self.ensure_open()?;
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir)
            .map_err(|source| TrustStoreError::Open { path: self.dir.clone(), source })?;

        let mut certificates = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| TrustStoreError::Open { path: self.dir.clone(), source })?;
            let file_name = entry.file_name();
            if file_name.to_str().map(is_entry_name).unwrap_or(false) {
                certificates.push(read_entry(&entry.path())?);
            }
        }
        certificates.sort_by(|a, b| a.thumbprint.cmp(&b.thumbprint));
        Ok(certificates)
    }

    /// A rustls root store holding every certificate in this store.
    pub fn root_cert_store(&self) -> Result<rustls::RootCertStore> {
        let mut roots = rustls::RootCertStore::empty();
        let (added, ignored) =
            roots.add_parsable_certificates(self.certificates()?.into_iter().map(|c| c.der));
        debug!(added, ignored, store = %self.name, "Built rustls root store");
        Ok(roots)
    }

    /// Write every certificate as one PEM bundle (for `SSL_CERT_FILE` style
    /// consumers). Returns the number of certificates written.
    pub fn export_bundle(&self, path: &Path) -> Result<usize> {
        let certificates = self.certificates()?;
        let bundle: String = certificates.iter().map(|c| to_pem(c.der.as_ref())).collect();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|source| TrustStoreError::Write { path: parent.clone(), source })?;
        write_atomically(&parent, path, bundle.as_bytes())?;
        info!(count = certificates.len(), path = %path.display(), "Exported trust bundle");
        Ok(certificates.len())
    }

    /// Release the store. Further operations fail with `Closed`.
    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            debug!(store = %self.name, location = %self.location, "Closed trust store");
        }
    }
}

impl Drop for OpenStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_entry(path: &Path) -> Result<StoredCertificate> {
    let bytes = fs::read(path)
        .map_err(|e| TrustStoreError::Read { path: path.to_path_buf(), reason: e.to_string() })?;
    let der = CertificateDer::from_pem_slice(&bytes)
        .map_err(|e| TrustStoreError::Read { path: path.to_path_buf(), reason: e.to_string() })?;
    Ok(StoredCertificate { thumbprint: thumbprint(der.as_ref()), der, path: path.to_path_buf() })
}

fn write_atomically(dir: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    let temp = write_temp(dir, target, contents)?;
    fs::rename(&temp, target).map_err(|source| {
        let _ = fs::remove_file(&temp);
        TrustStoreError::Write { path: target.to_path_buf(), source }
    })
}

/// Publish `contents` at `target` only if nothing is there yet. Returns
/// `false` when another writer got there first.
fn write_new(dir: &Path, target: &Path, contents: &[u8]) -> Result<bool> {
    let temp = write_temp(dir, target, contents)?;
    let linked = fs::hard_link(&temp, target);
    let _ = fs::remove_file(&temp);
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(source) => Err(TrustStoreError::Write { path: target.to_path_buf(), source }),
    }
}

fn write_temp(dir: &Path, target: &Path, contents: &[u8]) -> Result<PathBuf> {
    let file_name = target.file_name().and_then(|n| n.to_str()).unwrap_or("entry");
    let temp = dir.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()
    };

    write().map_err(|source| {
        let _ = fs::remove_file(&temp);
        TrustStoreError::Write { path: target.to_path_buf(), source }
    })?;
    Ok(temp)
}
