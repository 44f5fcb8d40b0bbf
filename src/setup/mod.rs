//! # Colaboradores de Arranque
//! src/setup/mod.rs
//!
//! Pasos que resuelven la configuración dependiente del entorno: archivo de
//! credenciales, material TLS, puertos de escucha, baja de privilegios y ACL.
//! El núcleo solo los secuencia; cada uno expone un único
//! `apply(setup) -> bool` y un `false` aborta el arranque.
//!
//! ## Orden
//!
//! ```text
//! auth file → TLS → puertos → run_as_user → ACL
//! ```
//!
//! TLS va antes que los puertos (un puerto `s` necesita el certificado) y la
//! baja de privilegios va después de abrir los sockets.

pub mod acl;
pub mod ports;
pub mod security;

pub use acl::{AccessControl, Acl};
pub use ports::{ListeningPorts, ListeningSocket};
#[cfg(not(windows))]
pub use security::RunAsUser;
pub use security::{GlobalAuthFile, SslCertificate, TlsMaterial};

use crate::callbacks::Diagnostics;
use crate::config::Config;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Contexto en construcción que ven los colaboradores
pub struct Setup {
    config: Config,
    diag: Diagnostics,
    listeners: Vec<ListeningSocket>,
    tls: Option<TlsMaterial>,
    auth_file: Option<PathBuf>,
    acl: Option<Acl>,
}

impl Setup {
    pub(crate) fn new(config: Config, diag: Diagnostics) -> Self {
        Self {
            config,
            diag,
            listeners: Vec::new(),
            tls: None,
            auth_file: None,
            acl: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reporta un error por el hook de logging del contexto
    pub fn cry(&self, message: &str) {
        self.diag.cry(message);
    }

    pub fn add_listener(&mut self, socket: ListeningSocket) {
        self.listeners.push(socket);
    }

    pub fn listeners(&self) -> &[ListeningSocket] {
        &self.listeners
    }

    pub fn set_tls(&mut self, material: TlsMaterial) {
        self.tls = Some(material);
    }

    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    pub fn set_auth_file(&mut self, path: PathBuf) {
        self.auth_file = Some(path);
    }

    pub fn auth_file(&self) -> Option<&Path> {
        self.auth_file.as_deref()
    }

    pub fn set_acl(&mut self, acl: Acl) {
        self.acl = Some(acl);
    }

    pub fn acl(&self) -> Option<&Acl> {
        self.acl.as_ref()
    }

    pub(crate) fn into_resolved(self) -> (Config, Vec<ListeningSocket>, Resolved) {
        let ports = self.listeners.iter().map(|socket| socket.local_addr).collect();
        (
            self.config,
            self.listeners,
            Resolved {
                ports,
                tls: self.tls,
                auth_file: self.auth_file,
                acl: self.acl,
            },
        )
    }
}

/// Resultado de los colaboradores que queda en el contexto
#[derive(Debug, Default)]
pub(crate) struct Resolved {
    pub(crate) ports: Vec<SocketAddr>,
    pub(crate) tls: Option<TlsMaterial>,
    pub(crate) auth_file: Option<PathBuf>,
    pub(crate) acl: Option<Acl>,
}

/// Colaborador externo invocado durante el arranque
pub trait SetupStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Retorna `false` si el arranque debe abortarse
    fn apply(&self, setup: &mut Setup) -> bool;
}

/// Paso construido a partir de un closure
pub struct FnStep<F> {
    name: &'static str,
    f: F,
}

impl<F> FnStep<F>
where
    F: Fn(&mut Setup) -> bool + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> SetupStep for FnStep<F>
where
    F: Fn(&mut Setup) -> bool + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, setup: &mut Setup) -> bool {
        (self.f)(setup)
    }
}

/// Los cinco colaboradores, reemplazables por el embebedor
pub struct Collaborators {
    pub auth_file: Box<dyn SetupStep>,
    pub tls: Box<dyn SetupStep>,
    pub ports: Box<dyn SetupStep>,
    #[cfg(not(windows))]
    pub run_as_user: Box<dyn SetupStep>,
    pub acl: Box<dyn SetupStep>,
}

impl Collaborators {
    pub fn with_auth_file(mut self, step: impl SetupStep + 'static) -> Self {
        self.auth_file = Box::new(step);
        self
    }

    pub fn with_tls(mut self, step: impl SetupStep + 'static) -> Self {
        self.tls = Box::new(step);
        self
    }

    pub fn with_ports(mut self, step: impl SetupStep + 'static) -> Self {
        self.ports = Box::new(step);
        self
    }

    #[cfg(not(windows))]
    pub fn with_run_as_user(mut self, step: impl SetupStep + 'static) -> Self {
        self.run_as_user = Box::new(step);
        self
    }

    pub fn with_acl(mut self, step: impl SetupStep + 'static) -> Self {
        self.acl = Box::new(step);
        self
    }

    /// Colaboradores en el orden en que deben aplicarse
    pub(crate) fn ordered(&self) -> Vec<&dyn SetupStep> {
        let mut steps: Vec<&dyn SetupStep> =
            vec![self.auth_file.as_ref(), self.tls.as_ref(), self.ports.as_ref()];
        #[cfg(not(windows))]
        steps.push(self.run_as_user.as_ref());
        steps.push(self.acl.as_ref());
        steps
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            auth_file: Box::new(GlobalAuthFile),
            tls: Box::new(SslCertificate),
            ports: Box::new(ListeningPorts),
            #[cfg(not(windows))]
            run_as_user: Box::new(RunAsUser),
            acl: Box::new(AccessControl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let collaborators = Collaborators::default();
        let names: Vec<_> = collaborators.ordered().iter().map(|s| s.name()).collect();

        #[cfg(not(windows))]
        assert_eq!(
            names,
            vec!["global_auth_file", "ssl_certificate", "listening_ports", "run_as_user", "access_control_list"]
        );
        #[cfg(windows)]
        assert_eq!(
            names,
            vec!["global_auth_file", "ssl_certificate", "listening_ports", "access_control_list"]
        );
    }

    #[test]
    fn test_fn_step_replaces_collaborator() {
        let collaborators =
            Collaborators::default().with_acl(FnStep::new("always-fails", |_setup: &mut Setup| false));
        let last = *collaborators.ordered().last().unwrap();
        assert_eq!(last.name(), "always-fails");

        let mut setup = Setup::new(Config::default(), Diagnostics::default());
        assert!(!last.apply(&mut setup));
    }

    #[test]
    fn test_into_resolved_collects_ports() {
        let mut setup = Setup::new(Config::default(), Diagnostics::default());
        let socket = ListeningSocket::bind("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let addr = socket.local_addr;
        setup.add_listener(socket);

        let (_config, listeners, resolved) = setup.into_resolved();
        assert_eq!(listeners.len(), 1);
        assert_eq!(resolved.ports, vec![addr]);
        assert!(resolved.tls.is_none());
    }
}
