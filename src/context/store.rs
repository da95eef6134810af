//! Persistent registry of the local identity, its settings, and the
//! services of the local pier and every imported remote pier.
//!
//! ```text
//! <home>/webpier.json                     root Config
//! <home>/webpier.lock                     Locker sentinel
//! <home>/journal/                         daemon logs
//! <home>/<hash(pier)>/<pier>/cert.crt     local certificate
//! <home>/<hash(pier)>/<pier>/private.key  local private key
//! <home>/<hash(pier)>/<pier>/webpier.json local service manifest
//! <home>/<hash(pier)>/<remote>/cert.crt   imported certificate
//! <home>/<hash(pier)>/<remote>/webpier.json imported service manifest
//! ```
//!
//! Every mutation is a locked write; the in-memory view changes only after
//! the write succeeded.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use super::certs::{CertificateProvider, SelfSignedProvider};
use super::locker::Locker;
use crate::config::Settings;
use crate::files::{read_json, write_json_atomic, write_private};
use crate::models::offer::{Offer, OfferedService};
use crate::models::service::Manifest;
use crate::models::{text_hash, Config, Dht, Email, Nat, Service};
use crate::validate::{
    is_ipv4_endpoint, is_network_endpoint, is_network_endpoint_list, is_valid_pier_name,
};
use crate::{AppError, Result};

/// Root configuration file name.
pub const CONFIG_FILE: &str = "webpier.json";
/// Lock sentinel file name.
pub const LOCK_FILE: &str = "webpier.lock";
/// Per-pier service manifest file name.
pub const MANIFEST_FILE: &str = "webpier.json";
/// Per-pier certificate file name.
pub const CERT_FILE: &str = "cert.crt";
/// Local pier private key file name.
pub const KEY_FILE: &str = "private.key";

/// Services keyed by owning pier id.
pub type ServiceMap = BTreeMap<String, Vec<Service>>;

#[derive(Serialize)]
struct ManifestRef<'a> {
    services: &'a [Service],
}

/// File-backed, optimistically concurrent context registry.
pub struct ContextStore {
    home: PathBuf,
    config: Config,
    services: ServiceMap,
    certificates: BTreeMap<String, String>,
    locker: Locker,
    provider: Arc<dyn CertificateProvider>,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("home", &self.home)
            .field("pier", &self.config.pier)
            .field("piers", &self.services.len())
            .finish_non_exhaustive()
    }
}

impl ContextStore {
    /// Open the store at `settings.home`, loading it if already initialized.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the home directory or lock sentinel cannot
    /// be created, or an existing context fails to parse.
    pub fn open(settings: &Settings) -> Result<Self> {
        Self::open_with_provider(settings, Arc::new(SelfSignedProvider))
    }

    /// Open the store with a custom credential provider.
    ///
    /// # Errors
    ///
    /// Same as [`ContextStore::open`].
    pub fn open_with_provider(
        settings: &Settings,
        provider: Arc<dyn CertificateProvider>,
    ) -> Result<Self> {
        let home = settings.home.clone();
        fs::create_dir_all(&home).map_err(|err| {
            AppError::Io(format!("failed to create home {}: {err}", home.display()))
        })?;
        let locker = Locker::open(home.join(LOCK_FILE), settings.lock_timeout())?;

        let mut store = Self {
            home,
            config: Config::default(),
            services: ServiceMap::new(),
            certificates: BTreeMap::new(),
            locker,
            provider,
        };

        // Later writes are checked against the stamp as of opening.
        if store.is_initialized() {
            store.load()?;
        } else {
            store.locker.observe()?;
        }
        Ok(store)
    }

    /// Home directory shared with the daemon.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Whether a root configuration exists on disk.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.home.join(CONFIG_FILE).exists()
    }

    /// Establish `pier` as the local identity.
    ///
    /// Adopts existing keys for `pier` if present; otherwise issues new
    /// credentials and lays out its directory. Other identities' files are
    /// never touched, so switching back and forth is lossless.
    ///
    /// # Errors
    ///
    /// `InvalidPier`, `StaleContext` if another process wrote since this
    /// store last looked, `LockTimeout`, credential generation or `Io`
    /// failures.
    pub fn init(&mut self, pier: &str) -> Result<()> {
        let base = self.config.clone();
        self.establish(pier, base)
    }

    /// Reload everything from disk under a shared lock.
    ///
    /// # Errors
    ///
    /// `LockTimeout` or `Io` (including schema mismatches).
    pub fn load(&mut self) -> Result<()> {
        let span = info_span!("context_load", home = %self.home.display());
        let _span = span.enter();

        let guard = self.locker.soft_lock()?;
        let config: Config = read_json(&self.home.join(CONFIG_FILE))?;
        let (services, certificates) = scan_repo(&config)?;
        guard.release();

        debug!(pier = %config.pier, piers = services.len(), "context loaded");
        self.config = config;
        self.services = services;
        self.certificates = certificates;
        Ok(())
    }

    /// Reload if another process changed the context since this store last
    /// looked. Returns whether a reload happened.
    ///
    /// # Errors
    ///
    /// `LockTimeout` or `Io` from the stamp check or the reload.
    pub fn refresh(&mut self) -> Result<bool> {
        // Nothing to reload until some process runs `init`.
        if !self.is_initialized() {
            return Ok(false);
        }
        match self.locker.verify() {
            Ok(()) => Ok(false),
            Err(AppError::StaleContext) => {
                info!(home = %self.home.display(), "context changed by another process, reloading");
                self.load()?;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Local pier id.
    #[must_use]
    pub fn get_pier(&self) -> &str {
        &self.config.pier
    }

    /// Copy of the active configuration.
    #[must_use]
    pub fn get_config(&self) -> Config {
        self.config.clone()
    }

    /// Copy of every pier's services.
    #[must_use]
    pub fn get_services(&self) -> ServiceMap {
        self.services.clone()
    }

    /// Services of the local pier only.
    #[must_use]
    pub fn get_local_services(&self) -> ServiceMap {
        self.services
            .iter()
            .filter(|(pier, _)| **pier == self.config.pier)
            .map(|(pier, list)| (pier.clone(), list.clone()))
            .collect()
    }

    /// Services of imported remote piers only.
    #[must_use]
    pub fn get_remote_services(&self) -> ServiceMap {
        self.services
            .iter()
            .filter(|(pier, _)| **pier != self.config.pier)
            .map(|(pier, list)| (pier.clone(), list.clone()))
            .collect()
    }

    /// One service of one pier.
    ///
    /// # Errors
    ///
    /// `UnknownPier` or `UnknownService`.
    pub fn get_service(&self, pier: &str, name: &str) -> Result<Service> {
        let list = self
            .services
            .get(pier)
            .ok_or_else(|| AppError::UnknownPier(pier.to_owned()))?;
        list.iter()
            .find(|service| service.name == name)
            .cloned()
            .ok_or_else(|| AppError::UnknownService(format!("{name} of {pier}")))
    }

    /// Services of `pier`; empty if the pier is unknown.
    #[must_use]
    pub fn get_pier_services(&self, pier: &str) -> Vec<Service> {
        self.services.get(pier).cloned().unwrap_or_default()
    }

    /// Imported remote pier ids.
    #[must_use]
    pub fn get_remotes(&self) -> Vec<String> {
        self.services
            .keys()
            .filter(|pier| **pier != self.config.pier)
            .cloned()
            .collect()
    }

    /// PEM certificate of `pier`, if registered.
    #[must_use]
    pub fn get_certificate(&self, pier: &str) -> Option<String> {
        self.certificates.get(pier).cloned()
    }

    /// Update NAT, DHT, and email settings; a different `pier` re-runs
    /// identity establishment with the new settings.
    ///
    /// # Errors
    ///
    /// `Config` for a malformed server endpoint, `StaleContext`,
    /// `LockTimeout`, `InvalidPier`, or `Io`.
    pub fn set_config(&mut self, pier: &str, nat: Nat, dht: Dht, email: Email) -> Result<()> {
        check_settings(&nat, &dht, &email)?;

        let mut next = self.config.clone();
        next.nat = nat;
        next.dht = dht;
        next.email = email;

        if pier != self.config.pier {
            return self.establish(pier, next);
        }

        let span = info_span!("context_set_config", pier);
        let _span = span.enter();
        {
            let _guard = self.locker.hard_lock()?;
            write_json_atomic(&self.home.join(CONFIG_FILE), &next)?;
        }
        self.config = next;
        info!("context settings updated");
        Ok(())
    }

    /// Insert or replace `service` in the manifest of `pier`.
    ///
    /// # Errors
    ///
    /// `UnknownPier`, `Config` for a malformed address or gateway, `StaleContext`,
    /// `LockTimeout`, or `Io`.
    pub fn set_service(&mut self, pier: &str, mut service: Service) -> Result<()> {
        let current = self
            .services
            .get(pier)
            .ok_or_else(|| AppError::UnknownPier(pier.to_owned()))?;

        check_endpoint("service address", &service.address, is_network_endpoint)?;
        // The gateway is the local UDP socket used for hole punching.
        check_endpoint("service gateway", &service.gateway, is_ipv4_endpoint)?;
        service.local = pier == self.config.pier;

        let mut updated = current.clone();
        match updated.iter_mut().find(|s| s.name == service.name) {
            Some(slot) => *slot = service,
            None => updated.push(service),
        }

        self.write_manifest(pier, &updated)?;
        self.services.insert(pier.to_owned(), updated);
        Ok(())
    }

    /// Remove service `name` from the manifest of `pier`.
    ///
    /// # Errors
    ///
    /// `UnknownPier`, `UnknownService`, `StaleContext`, `LockTimeout`, or `Io`.
    pub fn del_service(&mut self, pier: &str, name: &str) -> Result<()> {
        let current = self
            .services
            .get(pier)
            .ok_or_else(|| AppError::UnknownPier(pier.to_owned()))?;
        if !current.iter().any(|s| s.name == name) {
            return Err(AppError::UnknownService(format!("{name} of {pier}")));
        }

        let updated: Vec<Service> = current.iter().filter(|s| s.name != name).cloned().collect();
        self.write_manifest(pier, &updated)?;
        self.services.insert(pier.to_owned(), updated);
        Ok(())
    }

    /// Register a remote pier with its certificate.
    ///
    /// # Errors
    ///
    /// `InvalidPier`, `WrongPier` for the local pier or an existing remote,
    /// `StaleContext`, `LockTimeout`, or `Io`.
    pub fn add_remote(&mut self, pier: &str, certificate: &str) -> Result<()> {
        self.write_remote(pier, certificate, &[])
    }

    /// Delete a remote pier's certificate and manifest.
    ///
    /// # Errors
    ///
    /// `InvalidPier`, `WrongPier` for the local pier, `UnknownPier`, `StaleContext`,
    /// `LockTimeout`, or `Io`.
    pub fn del_remote(&mut self, pier: &str) -> Result<()> {
        let dir = self.remote_dir(pier)?;
        if pier == self.config.pier {
            return Err(AppError::WrongPier(pier.to_owned()));
        }
        if !dir.exists() && !self.services.contains_key(pier) {
            return Err(AppError::UnknownPier(pier.to_owned()));
        }

        let span = info_span!("context_del_remote", pier);
        let _span = span.enter();
        {
            let _guard = self.locker.hard_lock()?;
            if dir.exists() {
                fs::remove_dir_all(&dir).map_err(|err| {
                    AppError::Io(format!("failed to remove {}: {err}", dir.display()))
                })?;
            }
        }
        self.services.remove(pier);
        self.certificates.remove(pier);
        info!("remote pier removed");
        Ok(())
    }

    /// Bundle the local identity and its services for export.
    ///
    /// # Errors
    ///
    /// `UnknownPier` if the store has no local identity yet.
    pub fn export_offer(&self) -> Result<Offer> {
        let pier = &self.config.pier;
        let certificate = self
            .certificates
            .get(pier)
            .cloned()
            .ok_or_else(|| AppError::UnknownPier(pier.clone()))?;

        Ok(Offer {
            pier: pier.clone(),
            certificate,
            services: self
                .get_pier_services(pier)
                .into_iter()
                .map(|service| OfferedService {
                    name: service.name,
                    obscure: service.obscure,
                    rendezvous: service.rendezvous,
                })
                .collect(),
        })
    }

    /// Register the offering pier as a remote along with its advertised
    /// services, in one locked write. Imported services have no local
    /// address until bound with [`ContextStore::set_service`].
    ///
    /// # Errors
    ///
    /// Same as [`ContextStore::add_remote`].
    pub fn import_offer(&mut self, offer: &Offer) -> Result<()> {
        let services: Vec<Service> = offer
            .services
            .iter()
            .map(|offered| {
                let mut service = Service::new(false, offered.name.clone(), offer.pier.clone());
                service.obscure = offered.obscure;
                service.rendezvous.clone_from(&offered.rendezvous);
                service
            })
            .collect();
        self.write_remote(&offer.pier, &offer.certificate, &services)
    }

    fn establish(&mut self, pier: &str, mut config: Config) -> Result<()> {
        if !is_valid_pier_name(pier) {
            return Err(AppError::InvalidPier(pier.to_owned()));
        }

        let span = info_span!("context_init", pier);
        let _span = span.enter();

        pier.clone_into(&mut config.pier);
        config.repo = self.home.join(text_hash(pier));
        config.ensure_journal(&self.home);

        let pier_dir = config.pier_dir(pier);
        let adopt = pier_dir.join(KEY_FILE).exists();
        let credentials = if adopt {
            None
        } else {
            Some(self.provider.issue(pier)?)
        };

        fs::create_dir_all(&config.log.folder)?;
        {
            let _guard = self.locker.hard_lock()?;
            if let Some(ref credentials) = credentials {
                fs::create_dir_all(&pier_dir)?;
                fs::write(pier_dir.join(CERT_FILE), &credentials.certificate)?;
                write_private(&pier_dir.join(KEY_FILE), &credentials.private_key)?;
            }
            write_json_atomic(&self.home.join(CONFIG_FILE), &config)?;
        }

        if adopt {
            info!("adopted existing pier identity");
        } else {
            info!(repo = %config.repo.display(), "created new pier identity");
        }
        self.load()
    }

    fn write_manifest(&mut self, pier: &str, services: &[Service]) -> Result<()> {
        let path = self.config.pier_dir(pier).join(MANIFEST_FILE);
        let span = info_span!("context_write_manifest", pier, services = services.len());
        let _span = span.enter();

        let _guard = self.locker.hard_lock()?;
        write_json_atomic(&path, &ManifestRef { services })
    }

    fn write_remote(&mut self, pier: &str, certificate: &str, services: &[Service]) -> Result<()> {
        let dir = self.remote_dir(pier)?;
        if pier == self.config.pier || dir.exists() || self.services.contains_key(pier) {
            return Err(AppError::WrongPier(pier.to_owned()));
        }

        let span = info_span!("context_add_remote", pier, services = services.len());
        let _span = span.enter();
        {
            let _guard = self.locker.hard_lock()?;
            let written = fs::create_dir_all(&dir)
                .map_err(AppError::from)
                .and_then(|()| fs::write(dir.join(CERT_FILE), certificate).map_err(AppError::from))
                .and_then(|()| {
                    if services.is_empty() {
                        Ok(())
                    } else {
                        write_json_atomic(&dir.join(MANIFEST_FILE), &ManifestRef { services })
                    }
                });
            if let Err(err) = written {
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!(%cleanup, "failed to clean up partial remote directory");
                }
                return Err(err);
            }
        }

        self.services.insert(pier.to_owned(), services.to_vec());
        self.certificates.insert(pier.to_owned(), certificate.to_owned());
        info!("remote pier registered");
        Ok(())
    }

    /// Directory of `pier`, which must be exactly `<repo>/<owner>/<host>`.
    fn remote_dir(&self, pier: &str) -> Result<PathBuf> {
        if !is_valid_pier_name(pier) {
            return Err(AppError::InvalidPier(pier.to_owned()));
        }
        let repo = &self.config.repo;
        if repo.as_os_str().is_empty() {
            return Err(AppError::Config("context is not initialized".into()));
        }
        let dir = self.config.pier_dir(pier);
        let nested = dir.parent().and_then(Path::parent) == Some(repo.as_path())
            && dir.components().count() == repo.components().count() + 2;
        if !nested {
            return Err(AppError::InvalidPier(pier.to_owned()));
        }
        Ok(dir)
    }
}

/// Reject malformed server endpoints; empty values are left to the daemon.
fn check_settings(nat: &Nat, dht: &Dht, email: &Email) -> Result<()> {
    check_endpoint("nat.stun", &nat.stun, is_network_endpoint)?;
    check_endpoint("dht.bootstrap", &dht.bootstrap, is_network_endpoint_list)?;
    check_endpoint("email.smtp", &email.smtp, is_network_endpoint)?;
    check_endpoint("email.imap", &email.imap, is_network_endpoint)
}

fn check_endpoint(field: &str, value: &str, valid: fn(&str) -> bool) -> Result<()> {
    if value.is_empty() || valid(value) {
        Ok(())
    } else {
        Err(AppError::Config(format!("invalid {field}: {value}")))
    }
}

/// Walk `<repo>/<owner>/<host>/` collecting manifests and certificates.
fn scan_repo(config: &Config) -> Result<(ServiceMap, BTreeMap<String, String>)> {
    let mut services = ServiceMap::new();
    let mut certificates = BTreeMap::new();
    services.insert(config.pier.clone(), Vec::new());

    if !config.repo.is_dir() {
        return Ok((services, certificates));
    }

    for owner in fs::read_dir(&config.repo)? {
        let owner = owner?;
        if !owner.file_type()?.is_dir() {
            continue;
        }
        for host in fs::read_dir(owner.path())? {
            let host = host?;
            if !host.file_type()?.is_dir() {
                continue;
            }
            let owner_os = owner.file_name();
            let host_os = host.file_name();
            let (Some(owner_name), Some(host_name)) = (owner_os.to_str(), host_os.to_str())
            else {
                warn!(path = %host.path().display(), "skipping non utf-8 pier directory");
                continue;
            };
            let pier = format!("{owner_name}/{host_name}");
            let dir = host.path();

            let cert_path = dir.join(CERT_FILE);
            let has_cert = cert_path.exists();
            if has_cert {
                certificates.insert(pier.clone(), fs::read_to_string(&cert_path)?);
            }

            let manifest_path = dir.join(MANIFEST_FILE);
            if manifest_path.exists() {
                let manifest: Manifest = read_json(&manifest_path)?;
                services.insert(pier, manifest.services);
            } else if has_cert {
                services.entry(pier).or_default();
            }
        }
    }

    Ok((services, certificates))
}
