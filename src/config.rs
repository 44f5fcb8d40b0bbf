//! # Configuración del Motor
//! src/config.rs
//!
//! Tabla de opciones reconocidas y el mapeo `OptionIndex -> valor` que vive
//! dentro del contexto. El mapeo se construye una sola vez en el arranque a
//! partir de una lista plana `nombre, valor, nombre, valor, ...` y a partir de
//! ahí es de solo lectura para todos los threads.
//!
//! ## Ejemplos de uso
//!
//! ### Lista de opciones (API embebida)
//! ```text
//! ["listening_ports", "8080", "num_threads", "8", "dispatch_queue", "alternative"]
//! ```
//!
//! ### CLI
//! ```bash
//! ./http_engine --listening-ports 8080 --num-threads 8 -o access_control_list=+127.0.0.1
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORTS=8080 HTTP_NUM_THREADS=8 ./http_engine
//! ```

use crate::callbacks::Diagnostics;
use crate::error::StartError;
use crate::queue::QueueKind;
use clap::Parser;
use std::time::Duration;
use tracing::debug;

/// Máximo de workers que acepta un contexto
pub const MAX_WORKER_THREADS: usize = 1024;

/// Número de opciones reconocidas
pub const OPTION_COUNT: usize = 9;

/// Índice de cada opción reconocida dentro del mapeo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionIndex {
    NumThreads = 0,
    ListeningPorts = 1,
    ConnectionQueueSize = 2,
    DispatchQueue = 3,
    GlobalAuthFile = 4,
    SslCertificate = 5,
    RunAsUser = 6,
    AccessControlList = 7,
    RequestTimeoutMs = 8,
}

/// Entrada de la tabla de opciones
#[derive(Debug, Clone, Copy)]
pub struct ConfigOption {
    pub index: OptionIndex,
    pub name: &'static str,
    pub default: Option<&'static str>,
}

/// Tabla de opciones, en el mismo orden que `OptionIndex`
pub const CONFIG_OPTIONS: [ConfigOption; OPTION_COUNT] = [
    ConfigOption { index: OptionIndex::NumThreads, name: "num_threads", default: Some("50") },
    ConfigOption { index: OptionIndex::ListeningPorts, name: "listening_ports", default: Some("8080") },
    ConfigOption { index: OptionIndex::ConnectionQueueSize, name: "connection_queue_size", default: Some("20") },
    ConfigOption { index: OptionIndex::DispatchQueue, name: "dispatch_queue", default: Some("classic") },
    ConfigOption { index: OptionIndex::GlobalAuthFile, name: "global_auth_file", default: None },
    ConfigOption { index: OptionIndex::SslCertificate, name: "ssl_certificate", default: None },
    ConfigOption { index: OptionIndex::RunAsUser, name: "run_as_user", default: None },
    ConfigOption { index: OptionIndex::AccessControlList, name: "access_control_list", default: None },
    ConfigOption { index: OptionIndex::RequestTimeoutMs, name: "request_timeout_ms", default: Some("30000") },
];

impl OptionIndex {
    /// Resuelve un nombre de opción a su índice
    pub fn from_name(name: &str) -> Option<Self> {
        CONFIG_OPTIONS
            .iter()
            .find(|option| option.name == name)
            .map(|option| option.index)
    }

    pub fn name(self) -> &'static str {
        CONFIG_OPTIONS[self as usize].name
    }
}

/// Mapeo inmutable de opciones del contexto
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    values: [Option<String>; OPTION_COUNT],
}

impl Config {
    /// Configuración con todos los valores por defecto
    pub fn with_defaults() -> Self {
        let mut config = Self {
            values: std::array::from_fn(|_| None),
        };
        config.apply_defaults();
        config
    }

    /// Parsea la lista plana de opciones
    ///
    /// Cada nombre debe existir en `CONFIG_OPTIONS` y debe ir seguido de su
    /// valor. Una opción duplicada sobrescribe a la anterior con un warning.
    /// Las opciones no especificadas toman su valor por defecto.
    pub(crate) fn from_options<S: AsRef<str>>(
        options: &[S],
        diag: &Diagnostics,
    ) -> Result<Self, StartError> {
        let mut config = Self {
            values: std::array::from_fn(|_| None),
        };

        let mut iter = options.iter().map(AsRef::as_ref);
        while let Some(name) = iter.next() {
            let Some(index) = OptionIndex::from_name(name) else {
                diag.cry(&format!("Invalid option: {}", name));
                return Err(StartError::InvalidOption(name.to_string()));
            };

            let Some(value) = iter.next() else {
                diag.cry(&format!("{}: option value cannot be NULL", name));
                return Err(StartError::MissingValue(name.to_string()));
            };

            let slot = &mut config.values[index as usize];
            if slot.is_some() {
                diag.warn(&format!("warning: {}: duplicate option", name));
            }
            debug!("[{}] -> [{}]", name, value);
            *slot = Some(value.to_string());
        }

        config.apply_defaults();
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        for option in CONFIG_OPTIONS.iter() {
            let slot = &mut self.values[option.index as usize];
            if slot.is_none() {
                *slot = option.default.map(str::to_string);
            }
        }
    }

    /// Valor de una opción (None si no tiene valor ni default)
    pub fn get(&self, index: OptionIndex) -> Option<&str> {
        self.values[index as usize].as_deref()
    }

    /// Valor de una opción, tratando el string vacío como ausente
    pub fn get_non_empty(&self, index: OptionIndex) -> Option<&str> {
        self.get(index).filter(|value| !value.trim().is_empty())
    }

    /// Número de workers configurado
    ///
    /// Debe ser un entero >= 1 y no mayor a `MAX_WORKER_THREADS`.
    pub fn num_threads(&self) -> Result<usize, StartError> {
        let requested = self.parse_positive(OptionIndex::NumThreads)?;
        if requested > MAX_WORKER_THREADS {
            return Err(StartError::TooManyWorkers {
                requested,
                max: MAX_WORKER_THREADS,
            });
        }
        Ok(requested)
    }

    /// Capacidad de la cola clásica
    pub fn connection_queue_size(&self) -> Result<usize, StartError> {
        self.parse_positive(OptionIndex::ConnectionQueueSize)
    }

    /// Variante de la cola de despacho
    pub fn dispatch_queue(&self) -> Result<QueueKind, StartError> {
        let value = self.get(OptionIndex::DispatchQueue).unwrap_or("classic");
        value.parse().map_err(|reason| StartError::InvalidValue {
            name: OptionIndex::DispatchQueue.name(),
            value: value.to_string(),
            reason,
        })
    }

    /// Timeout de lectura/escritura por conexión (0 = sin timeout)
    pub fn request_timeout(&self) -> Result<Option<Duration>, StartError> {
        let value = self.get(OptionIndex::RequestTimeoutMs).unwrap_or("0");
        let millis: u64 = value.trim().parse().map_err(|_| StartError::InvalidValue {
            name: OptionIndex::RequestTimeoutMs.name(),
            value: value.to_string(),
            reason: "expected milliseconds".to_string(),
        })?;

        Ok((millis > 0).then(|| Duration::from_millis(millis)))
    }

    fn parse_positive(&self, index: OptionIndex) -> Result<usize, StartError> {
        let value = self.get(index).unwrap_or("");
        match value.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(StartError::InvalidValue {
                name: index.name(),
                value: value.to_string(),
                reason: "expected a positive integer".to_string(),
            }),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Argumentos de línea de comandos del binario
#[derive(Debug, Clone, Parser)]
#[command(name = "http_engine")]
#[command(about = "Motor HTTP embebible: thread maestro + pool de workers")]
#[command(version = "0.1.0")]
pub struct CliArgs {
    /// Puertos de escucha (ej: "8080,127.0.0.1:8081,8443s")
    #[arg(short = 'p', long = "listening-ports", env = "HTTP_PORTS")]
    pub listening_ports: Option<String>,

    /// Número de workers
    #[arg(short = 't', long = "num-threads", env = "HTTP_NUM_THREADS")]
    pub num_threads: Option<usize>,

    /// Variante de cola: classic | alternative
    #[arg(long = "dispatch-queue", env = "HTTP_DISPATCH_QUEUE")]
    pub dispatch_queue: Option<String>,

    /// Capacidad de la cola clásica
    #[arg(long = "connection-queue-size", env = "HTTP_QUEUE_SIZE")]
    pub connection_queue_size: Option<usize>,

    /// Lista de control de acceso (ej: "-0.0.0.0/0,+127.0.0.1")
    #[arg(long = "access-control-list", env = "HTTP_ACL")]
    pub access_control_list: Option<String>,

    /// Certificado PEM para los puertos TLS
    #[arg(long = "ssl-certificate", env = "HTTP_SSL_CERTIFICATE")]
    pub ssl_certificate: Option<String>,

    /// Archivo global de credenciales
    #[arg(long = "global-auth-file", env = "HTTP_AUTH_FILE")]
    pub global_auth_file: Option<String>,

    /// Usuario al que bajar privilegios tras abrir los puertos
    #[arg(long = "run-as-user", env = "HTTP_RUN_AS_USER")]
    pub run_as_user: Option<String>,

    /// Timeout por conexión en milisegundos
    #[arg(long = "request-timeout-ms", env = "HTTP_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Opción genérica NAME=VALUE (repetible)
    #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
    pub extra: Vec<String>,
}

impl CliArgs {
    /// Aplana los argumentos a la lista `nombre, valor, ...` que espera `start`
    pub fn into_options(self) -> Result<Vec<String>, String> {
        let mut options = Vec::new();
        let mut push = |index: OptionIndex, value: Option<String>| {
            if let Some(value) = value {
                options.push(index.name().to_string());
                options.push(value);
            }
        };

        push(OptionIndex::ListeningPorts, self.listening_ports);
        push(OptionIndex::NumThreads, self.num_threads.map(|n| n.to_string()));
        push(OptionIndex::DispatchQueue, self.dispatch_queue);
        push(
            OptionIndex::ConnectionQueueSize,
            self.connection_queue_size.map(|n| n.to_string()),
        );
        push(OptionIndex::AccessControlList, self.access_control_list);
        push(OptionIndex::SslCertificate, self.ssl_certificate);
        push(OptionIndex::GlobalAuthFile, self.global_auth_file);
        push(OptionIndex::RunAsUser, self.run_as_user);
        push(
            OptionIndex::RequestTimeoutMs,
            self.request_timeout_ms.map(|n| n.to_string()),
        );

        for pair in self.extra {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Expected NAME=VALUE, got '{}'", pair))?;
            options.push(name.trim().to_string());
            options.push(value.to_string());
        }

        Ok(options)
    }
}
