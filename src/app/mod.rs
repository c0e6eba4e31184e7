use crate::{
    cli::RunOptions,
    config::{AckMode, Config},
    display::{FrameGeometry, HeadlessDisplay, SharedDisplay},
    protocol::{Dispatcher, DispatcherConfig},
    serial::{
        backoff::BackoffController, errors::classify_error, PacketAssembler, SerialOptions,
    },
    storage::{FlashBudget, FlashFs, HostFs, MemFs, Storage},
    Result,
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

mod connection;
mod lifecycle;
mod logger;
mod serve_loop;
pub mod telemetry;

use connection::attempt_serial_connect;
use lifecycle::create_shutdown_flag;
pub use logger::{LogLevel, Logger};
use serve_loop::{serve, ServeContext};
use telemetry::{BackoffPhase, Journal};

const IDLE_SLEEP_MS: u64 = 50;

/// Where the flash partition lives for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Host(PathBuf),
}

/// Config for the daemon: file values with CLI overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub device: String,
    pub baud: u32,
    pub serial_timeout_ms: u64,
    pub packet_size: usize,
    pub ack_mode: AckMode,
    pub backend: StorageBackend,
    pub budget: FlashBudget,
    pub geometry: FrameGeometry,
    pub fps: u32,
    pub frame_dump: Option<String>,
    pub journal_path: Option<String>,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
}

impl AppConfig {
    pub fn from_sources(config: Config, opts: RunOptions) -> Result<Self> {
        let backend = if opts.memory {
            StorageBackend::Memory
        } else {
            match opts.root {
                Some(root) => StorageBackend::Host(PathBuf::from(root)),
                None => StorageBackend::Host(config.resolved_storage_root()?),
            }
        };
        let log_level = opts
            .log_level
            .as_deref()
            .and_then(|s| LogLevel::from_str(s).ok())
            .unwrap_or_default();

        Ok(Self {
            device: opts.device.unwrap_or(config.device),
            baud: opts.baud.unwrap_or(config.baud),
            serial_timeout_ms: config.serial_timeout_ms,
            packet_size: config.packet_size,
            ack_mode: opts.ack_mode.unwrap_or(config.ack_mode),
            backend,
            budget: FlashBudget {
                total_blocks: config.total_blocks,
                block_size: config.block_size,
            },
            geometry: FrameGeometry {
                width: config.frame_width,
                height: config.frame_height,
                bytes_per_pixel: config.bytes_per_pixel,
            },
            fps: config.fps,
            frame_dump: config.frame_dump,
            journal_path: config.journal_path,
            backoff_initial_ms: config.backoff_initial_ms,
            backoff_max_ms: config.backoff_max_ms,
            log_level,
            log_file: opts.log_file,
        })
    }

    pub fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            baud: self.baud,
            timeout_ms: self.serial_timeout_ms,
        }
    }

    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            mtu: self.packet_size,
            budget: self.budget,
            geometry: self.geometry,
            fps: self.fps,
        }
    }
}

pub struct App {
    config: AppConfig,
    logger: Logger,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let logger = Logger::new(config.log_level, config.log_file.clone())?;
        Ok(Self { config, logger })
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        let cfg_file = Config::load_or_default()?;
        let merged = AppConfig::from_sources(cfg_file, opts)?;
        Self::new(merged)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Entry point for the daemon: mount storage, then serve the serial link
    /// until ctrl-c.
    pub fn run(&self) -> Result<()> {
        let running = create_shutdown_flag()?;
        match &self.config.backend {
            StorageBackend::Memory => {
                let fs = MemFs::with_geometry(
                    self.config.budget.block_size,
                    self.config.budget.total_blocks,
                );
                self.logger.info("using volatile in-memory flash");
                self.run_with(fs, &running)
            }
            StorageBackend::Host(root) => {
                let mut fs = HostFs::new(root, self.config.budget.block_size)?;
                fs.mount()?;
                self.logger
                    .info(format!("flash mounted at {}", fs.root().display()));
                self.run_with(fs, &running)
            }
        }
    }

    fn run_with<F: FlashFs + 'static>(&self, mut fs: F, running: &AtomicBool) -> Result<()> {
        let config = &self.config;
        let used = fs.used_blocks()?;
        self.logger.info(format!(
            "flash: {used}/{} blocks used, {} bytes free",
            config.budget.total_blocks,
            config.budget.free_bytes(used)
        ));

        let display = match &config.frame_dump {
            Some(path) => HeadlessDisplay::with_dump(path),
            None => HeadlessDisplay::new(),
        };
        let mut dispatcher = Dispatcher::new(
            Storage::new(fs),
            SharedDisplay::new(display),
            config.dispatcher_config(),
            self.logger.clone(),
        );
        let journal = match &config.journal_path {
            Some(path) => Some(Journal::open(Path::new(path))?),
            None => None,
        };
        let mut assembler = PacketAssembler::new(config.packet_size);
        let mut backoff = BackoffController::new(config.backoff_initial_ms, config.backoff_max_ms);
        let ctx = ServeContext {
            ack: config.ack_mode,
            journal: journal.as_ref(),
            logger: &self.logger,
            running,
        };

        self.logger.info(format!(
            "daemon start (device={}, baud={}, mtu={}, ack={})",
            config.device,
            config.baud,
            config.packet_size,
            config.ack_mode.as_str()
        ));

        while running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if !backoff.should_retry(now) {
                thread::sleep(backoff.remaining(now).min(Duration::from_millis(IDLE_SLEEP_MS)));
                continue;
            }

            self.journal_backoff(&journal, BackoffPhase::Attempt, &backoff, None);
            let mut port =
                match attempt_serial_connect(&self.logger, &config.device, config.serial_options())
                {
                    Ok(port) => port,
                    Err(kind) => {
                        backoff.mark_failure(Instant::now());
                        self.journal_backoff(&journal, BackoffPhase::Failure, &backoff, Some(kind));
                        if !kind.is_retryable() {
                            dispatcher.shutdown();
                            return Err(crate::Error::InvalidArgs(format!(
                                "cannot open {}: {kind}",
                                config.device
                            )));
                        }
                        continue;
                    }
                };
            backoff.mark_success(Instant::now());
            self.journal_backoff(&journal, BackoffPhase::Success, &backoff, None);

            assembler.reset();
            dispatcher.greet();
            if let Err(err) = serve(&mut port, &mut dispatcher, &mut assembler, &ctx) {
                let kind = classify_error(&err);
                self.logger
                    .warn(format!("serial link lost ({kind}): {err}; reconnecting"));
                backoff.mark_failure(Instant::now());
                self.journal_backoff(&journal, BackoffPhase::Failure, &backoff, Some(kind));
            }
        }

        self.logger.info("shutting down");
        dispatcher.shutdown();
        Ok(())
    }

    fn journal_backoff(
        &self,
        journal: &Option<Journal>,
        phase: BackoffPhase,
        backoff: &BackoffController,
        failure: Option<crate::serial::errors::SerialFailureKind>,
    ) {
        let Some(journal) = journal else {
            return;
        };
        let delay_ms = backoff.current_delay().as_millis() as u64;
        if let Err(err) =
            journal.record_backoff(phase, backoff.attempts(), delay_ms, &self.config.device, failure)
        {
            self.logger.warn(format!("journal write failed: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_values() {
        let file = Config {
            device: "/dev/ttyGS1".into(),
            baud: 57_600,
            ack_mode: AckMode::Text,
            storage_root: Some("/srv/flash".into()),
            ..Config::default()
        };
        let opts = RunOptions {
            device: Some("/dev/ttyACM0".into()),
            ack_mode: Some(AckMode::Packet),
            log_level: Some("debug".into()),
            ..RunOptions::default()
        };
        let merged = AppConfig::from_sources(file, opts).unwrap();
        assert_eq!(merged.device, "/dev/ttyACM0");
        assert_eq!(merged.baud, 57_600);
        assert_eq!(merged.ack_mode, AckMode::Packet);
        assert_eq!(merged.backend, StorageBackend::Host(PathBuf::from("/srv/flash")));
        assert_eq!(merged.log_level, LogLevel::Debug);
    }

    #[test]
    fn memory_flag_selects_volatile_backend() {
        let opts = RunOptions {
            memory: true,
            ..RunOptions::default()
        };
        let merged = AppConfig::from_sources(Config::default(), opts).unwrap();
        assert_eq!(merged.backend, StorageBackend::Memory);
        assert_eq!(merged.geometry, FrameGeometry::default());
        assert_eq!(merged.serial_options().baud, crate::config::DEFAULT_BAUD);
    }
}
