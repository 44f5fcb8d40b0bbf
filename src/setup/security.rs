//! # Credenciales, TLS y Privilegios
//! src/setup/security.rs

use super::{Setup, SetupStep};
use crate::config::OptionIndex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Verifica que el archivo global de credenciales exista
pub struct GlobalAuthFile;

impl SetupStep for GlobalAuthFile {
    fn name(&self) -> &'static str {
        "global_auth_file"
    }

    fn apply(&self, setup: &mut Setup) -> bool {
        let Some(path) = setup.config().get_non_empty(OptionIndex::GlobalAuthFile) else {
            return true;
        };
        let path = PathBuf::from(path);

        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                setup.set_auth_file(path);
                true
            }
            Ok(_) => {
                setup.cry(&format!("Cannot open {}: not a regular file", path.display()));
                false
            }
            Err(e) => {
                setup.cry(&format!("Cannot open {}: {}", path.display(), e));
                false
            }
        }
    }
}

/// Certificado cargado para los puertos TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    path: PathBuf,
    pem: Vec<u8>,
}

impl TlsMaterial {
    /// Lee un certificado PEM desde disco
    pub fn load(path: &Path) -> Result<Self, String> {
        let pem = fs::read(path).map_err(|e| format!("Cannot open {}: {}", path.display(), e))?;
        if !contains(&pem, b"-----BEGIN ") {
            return Err(format!("{}: not a PEM file", path.display()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            pem,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Carga el certificado si `ssl_certificate` está configurado
pub struct SslCertificate;

impl SetupStep for SslCertificate {
    fn name(&self) -> &'static str {
        "ssl_certificate"
    }

    fn apply(&self, setup: &mut Setup) -> bool {
        let Some(path) = setup.config().get_non_empty(OptionIndex::SslCertificate) else {
            return true;
        };
        let path = PathBuf::from(path);

        match TlsMaterial::load(&path) {
            Ok(material) => {
                info!("loaded certificate {}", path.display());
                setup.set_tls(material);
                true
            }
            Err(e) => {
                setup.cry(&e);
                false
            }
        }
    }
}

/// Baja de privilegios
///
/// Sin acceso a `setuid` desde la biblioteca estándar, el paso incorporado
/// solo acepta el usuario con el que ya corre el proceso. Un embebedor que
/// necesite cambiar de usuario reemplaza este colaborador.
#[cfg(not(windows))]
pub struct RunAsUser;

#[cfg(not(windows))]
impl RunAsUser {
    fn current_user() -> Option<String> {
        std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .ok()
            .filter(|u| !u.is_empty())
    }
}

#[cfg(not(windows))]
impl SetupStep for RunAsUser {
    fn name(&self) -> &'static str {
        "run_as_user"
    }

    fn apply(&self, setup: &mut Setup) -> bool {
        let Some(user) = setup.config().get_non_empty(OptionIndex::RunAsUser) else {
            return true;
        };
        let user = user.trim().to_string();

        match Self::current_user() {
            Some(current) if current == user => {
                info!("already running as {}", user);
                true
            }
            _ => {
                setup.cry(&format!("Unknown user or cannot switch to user '{}'", user));
                false
            }
        }
    }
}
