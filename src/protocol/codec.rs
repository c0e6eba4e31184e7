use crossbeam::channel::{self, Receiver, Sender};

use crate::animation::{AnimationPlayer, DEFAULT_FPS};
use crate::app::Logger;
use crate::display::{Display, FrameGeometry, SharedDisplay};
use crate::handlers::files::{self, TimeOfDay};
use crate::handlers::{
    screen, CatCursor, CommandError, DirCursor, DisplayWriter, HandlerResult, Reply, WriteSession,
};
use crate::storage::{FlashBudget, FlashFs, Storage};

use super::{CommandId, Request, Status, DEFAULT_MTU};

/// Greeting written on the side channel when a host attaches.
pub const BOOT_GREETING: &[u8] = b"Hello CDC!\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub mtu: usize,
    pub budget: FlashBudget,
    pub geometry: FrameGeometry,
    pub fps: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            budget: FlashBudget::default(),
            geometry: FrameGeometry::default(),
            fps: DEFAULT_FPS,
        }
    }
}

/// Out-of-band events produced while handling packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Raw bytes for the side channel.
    Raw(Vec<u8>),
    /// The host set the wall clock.
    Clock(TimeOfDay),
}

/// Owns every cross-call session and routes decoded packets to handlers.
pub struct Dispatcher<F: FlashFs + 'static, D: Display + 'static> {
    storage: Storage<F>,
    display: SharedDisplay<D>,
    config: DispatcherConfig,
    cwd: String,
    listing: DirCursor,
    writer: WriteSession,
    reader: CatCursor,
    screen: DisplayWriter,
    player: Option<AnimationPlayer<F, D>>,
    clock: Option<TimeOfDay>,
    last_command: Option<CommandId>,
    logger: Logger,
    notice_tx: Sender<Notice>,
    notice_rx: Receiver<Notice>,
}

impl<F: FlashFs + 'static, D: Display + 'static> Dispatcher<F, D> {
    pub fn new(
        storage: Storage<F>,
        display: SharedDisplay<D>,
        config: DispatcherConfig,
        logger: Logger,
    ) -> Self {
        let (notice_tx, notice_rx) = channel::unbounded();
        Self {
            storage,
            display,
            screen: DisplayWriter::new(config.geometry.frame_size()),
            config,
            cwd: "/".to_string(),
            listing: DirCursor::new(),
            writer: WriteSession::new(),
            reader: CatCursor::new(),
            player: None,
            clock: None,
            last_command: None,
            logger,
            notice_tx,
            notice_rx,
        }
    }

    pub fn mtu(&self) -> usize {
        self.config.mtu
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn clock(&self) -> Option<TimeOfDay> {
        self.clock
    }

    /// Command of the last packet that passed header validation.
    pub fn last_command(&self) -> Option<CommandId> {
        self.last_command
    }

    pub fn storage(&self) -> &Storage<F> {
        &self.storage
    }

    pub fn display(&self) -> &SharedDisplay<D> {
        &self.display
    }

    pub fn animation(&self) -> Option<&AnimationPlayer<F, D>> {
        self.player.as_ref()
    }

    pub fn write_session(&self) -> &WriteSession {
        &self.writer
    }

    pub fn listing_open(&self) -> bool {
        self.listing.is_open()
    }

    pub fn notices(&self) -> Receiver<Notice> {
        self.notice_rx.clone()
    }

    pub fn drain_notices(&self) -> Vec<Notice> {
        self.notice_rx.try_iter().collect()
    }

    pub fn greet(&self) {
        self.notify(Notice::Raw(BOOT_GREETING.to_vec()));
    }

    /// Validate `buf[..len]`, run the handler and write the status byte in place.
    ///
    /// Rejected packets only get byte 0 overwritten. Accepted packets have
    /// bytes `1..mtu` cleared before the handler fills them.
    pub fn decode_and_dispatch(&mut self, buf: &mut [u8], len: usize) -> Status {
        if buf.is_empty() {
            return Status::InvalidCommand;
        }
        let decoded = if len > buf.len() {
            None
        } else {
            match Request::decode(&buf[..len], self.config.mtu) {
                Ok(req) => Some((req.command, req.payload.to_vec())),
                Err(err) => {
                    self.logger.debug(format!("packet rejected: {err}"));
                    None
                }
            }
        };
        let Some((command, payload)) = decoded else {
            buf[0] = Status::InvalidCommand.code();
            return Status::InvalidCommand;
        };

        self.last_command = Some(command);
        let end = self.config.mtu.min(buf.len());
        buf[1..end].fill(0);
        let result = self.dispatch(command, &payload, &mut buf[1..end]);
        let status = match result {
            Ok(Reply::Done) => Status::Success,
            Ok(Reply::More) => Status::MoreEntries,
            Err(CommandError::Invalid) => Status::InvalidCommand,
            Err(CommandError::FlashFull) => Status::FlashFull,
            Err(CommandError::Fs(err)) => Status::Fs(err),
        };
        buf[0] = status.code();
        if status.is_ok() {
            self.logger.trace(format!("{command}: {status}"));
        } else {
            self.logger.debug(format!("{command}: {status}"));
        }
        status
    }

    fn dispatch(&mut self, command: CommandId, payload: &[u8], out: &mut [u8]) -> HandlerResult {
        match command {
            CommandId::List => {
                let path = if matches!(payload.first(), None | Some(0)) {
                    self.cwd.clone()
                } else {
                    files::target(&self.cwd, payload)?
                };
                let mut fs = self.storage.lock();
                self.listing.first_page(&mut *fs, &path, out)
            }
            CommandId::ListNext => {
                let mut fs = self.storage.lock();
                self.listing.next_page(&mut *fs, out)
            }
            CommandId::ChangeDir => {
                files::change_dir(&mut *self.storage.lock(), &mut self.cwd, payload)
            }
            CommandId::PrintDir => files::print_dir(&self.cwd, out),
            CommandId::Remove => files::remove(&mut *self.storage.lock(), &self.cwd, payload),
            CommandId::MakeDir => files::make_dir(&mut *self.storage.lock(), &self.cwd, payload),
            CommandId::Touch => files::touch(&mut *self.storage.lock(), &self.cwd, payload),
            CommandId::Cat => {
                let path = files::target(&self.cwd, payload)?;
                let mut fs = self.storage.lock();
                self.reader.cat(&mut *fs, &path, out)
            }
            CommandId::Open => {
                let path = files::target(&self.cwd, payload)?;
                let mut fs = self.storage.lock();
                self.writer.open(&mut *fs, &path, &self.logger)?;
                Ok(Reply::Done)
            }
            CommandId::Write => {
                if payload.is_empty() {
                    return Err(CommandError::Invalid);
                }
                let mut fs = self.storage.lock();
                self.writer.write(&mut *fs, self.config.budget, payload)
            }
            CommandId::Close => {
                let mut fs = self.storage.lock();
                self.writer.close(&mut *fs)
            }
            CommandId::Format => {
                if let Some(player) = self.player.as_mut() {
                    player.cleanup();
                }
                let mut fs = self.storage.lock();
                self.listing.close(&mut *fs);
                self.reader.close(&mut *fs);
                self.writer.abandon(&mut *fs);
                let reply = files::format(&mut *fs);
                if reply.is_ok() {
                    self.cwd = "/".to_string();
                    self.logger.info("filesystem formatted");
                }
                reply
            }
            CommandId::FreeSpace => {
                let mut fs = self.storage.lock();
                files::free_space(&mut *fs, self.config.budget, out)
            }
            CommandId::ChooseImage => {
                let cwd = self.cwd.clone();
                screen::choose_image(self.player(), &cwd, payload)
            }
            CommandId::WriteDisplay => {
                let frame = match self.screen.push(payload)? {
                    Some(frame) => frame.to_vec(),
                    None => return Ok(Reply::Done),
                };
                self.player().show_pixels(&frame)?;
                Ok(Reply::Done)
            }
            CommandId::SetTime => {
                let time = TimeOfDay::parse(payload)?;
                self.clock = Some(time);
                self.logger.info(format!("time set to {time}"));
                self.notify(Notice::Clock(time));
                Ok(Reply::Done)
            }
            CommandId::Ping => {
                let ident = format!("toffee-module {}\n", env!("CARGO_PKG_VERSION"));
                self.notify(Notice::Raw(ident.into_bytes()));
                Ok(Reply::Done)
            }
        }
    }

    fn player(&mut self) -> &mut AnimationPlayer<F, D> {
        self.player.get_or_insert_with(|| {
            AnimationPlayer::new(
                self.storage.clone(),
                self.display.clone(),
                self.config.geometry,
                self.config.fps,
                self.logger.clone(),
            )
        })
    }

    fn notify(&self, notice: Notice) {
        // The receiver lives in `self`, so the channel cannot be disconnected.
        let _ = self.notice_tx.send(notice);
    }

    /// Stop playback and close every open session.
    pub fn shutdown(&mut self) {
        if let Some(player) = self.player.as_mut() {
            player.cleanup();
        }
        let mut fs = self.storage.lock();
        self.listing.close(&mut *fs);
        self.reader.close(&mut *fs);
        if self.writer.is_open() {
            self.logger.warn("closing unfinished write session");
        }
        self.writer.abandon(&mut *fs);
    }
}

impl<F: FlashFs + 'static, D: Display + 'static> Drop for Dispatcher<F, D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;
    use crate::display::HeadlessDisplay;
    use crate::protocol::{encode_request, MAGIC};
    use crate::storage::MemFs;

    fn dispatcher() -> Dispatcher<MemFs, HeadlessDisplay> {
        Dispatcher::new(
            Storage::new(MemFs::new()),
            SharedDisplay::new(HeadlessDisplay::new()),
            DispatcherConfig::default(),
            Logger::stderr(LogLevel::Error),
        )
    }

    fn send(
        dispatcher: &mut Dispatcher<MemFs, HeadlessDisplay>,
        command: CommandId,
        payload: &[u8],
    ) -> (Status, [u8; DEFAULT_MTU]) {
        let packet = encode_request(command, payload);
        let mut buf = [0u8; DEFAULT_MTU];
        buf[..packet.len()].copy_from_slice(&packet);
        let status = dispatcher.decode_and_dispatch(&mut buf, packet.len());
        (status, buf)
    }

    #[test]
    fn rejected_packet_only_touches_status_byte() {
        let mut d = dispatcher();
        let mut buf = [0xAAu8; DEFAULT_MTU];
        buf[0] = 0x08;
        assert_eq!(d.decode_and_dispatch(&mut buf, 10), Status::InvalidCommand);
        assert_eq!(buf[0], Status::INVALID_COMMAND);
        assert!(buf[1..].iter().all(|b| *b == 0xAA));
        assert_eq!(d.last_command(), None);
    }

    #[test]
    fn length_beyond_buffer_is_rejected() {
        let mut d = dispatcher();
        let mut buf = [MAGIC, 0x40, 0, 0, 0, 0];
        assert_eq!(d.decode_and_dispatch(&mut buf, 7), Status::InvalidCommand);
    }

    #[test]
    fn pwd_writes_after_status_byte() {
        let mut d = dispatcher();
        let (status, buf) = send(&mut d, CommandId::PrintDir, &[]);
        assert_eq!(status, Status::Success);
        assert_eq!(buf[0], 0x00);
        assert_eq!(&buf[1..3], b"/\0");
    }

    #[test]
    fn ping_and_greeting_use_side_channel() {
        let mut d = dispatcher();
        d.greet();
        let (status, _) = send(&mut d, CommandId::Ping, &[]);
        assert_eq!(status, Status::Success);
        let notices = d.drain_notices();
        assert_eq!(notices[0], Notice::Raw(BOOT_GREETING.to_vec()));
        match &notices[1] {
            Notice::Raw(bytes) => assert!(bytes.starts_with(b"toffee-module")),
            other => panic!("unexpected notice {other:?}"),
        }
    }

    #[test]
    fn set_time_reaches_the_clock_hook() {
        let mut d = dispatcher();
        let (status, _) = send(&mut d, CommandId::SetTime, &[7, 30, 0]);
        assert_eq!(status, Status::Success);
        assert_eq!(
            d.clock(),
            Some(TimeOfDay {
                hour: 7,
                minute: 30,
                second: 0
            })
        );
        let (status, _) = send(&mut d, CommandId::SetTime, &[7]);
        assert_eq!(status, Status::InvalidCommand);
    }
}
