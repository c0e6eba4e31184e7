use std::sync::atomic::{AtomicBool, Ordering};

use super::telemetry::Journal;
use super::Logger;
use crate::config::AckMode;
use crate::display::Display;
use crate::protocol::{Dispatcher, Notice, Request};
use crate::serial::{Link, PacketAssembler};
use crate::storage::FlashFs;
use crate::Result;

const READ_CHUNK: usize = 512;
const ACK_OK: &[u8] = b"OK";
const ACK_ERROR: &[u8] = b"ERROR";

/// Everything the serve loop needs besides the link itself.
pub(crate) struct ServeContext<'a> {
    pub ack: AckMode,
    pub journal: Option<&'a Journal>,
    pub logger: &'a Logger,
    pub running: &'a AtomicBool,
}

/// Pump packets from `link` through the dispatcher until the running flag
/// clears or the link fails. Link errors are returned so the caller can
/// reconnect.
pub(crate) fn serve<L, F, D>(
    link: &mut L,
    dispatcher: &mut Dispatcher<F, D>,
    assembler: &mut PacketAssembler,
    ctx: &ServeContext<'_>,
) -> Result<()>
where
    L: Link,
    F: FlashFs + 'static,
    D: Display + 'static,
{
    let mut buf = [0u8; READ_CHUNK];
    while ctx.running.load(Ordering::SeqCst) {
        write_notices(link, dispatcher, ctx.logger)?;

        let read = link.read_bytes(&mut buf)?;
        if read == 0 {
            if let Some(partial) = assembler.flush_idle() {
                ctx.logger.debug(format!(
                    "line idle with {} byte partial packet",
                    partial.len()
                ));
                handle_packet(link, dispatcher, &partial, ctx)?;
            }
            continue;
        }

        for packet in assembler.push(&buf[..read]) {
            handle_packet(link, dispatcher, &packet, ctx)?;
        }
    }
    write_notices(link, dispatcher, ctx.logger)
}

fn handle_packet<L, F, D>(
    link: &mut L,
    dispatcher: &mut Dispatcher<F, D>,
    packet: &[u8],
    ctx: &ServeContext<'_>,
) -> Result<()>
where
    L: Link,
    F: FlashFs + 'static,
    D: Display + 'static,
{
    let mtu = dispatcher.mtu();
    let len = packet.len().min(mtu);
    let mut frame = vec![0u8; mtu];
    frame[..len].copy_from_slice(&packet[..len]);

    let command = Request::decode(&frame[..len], mtu).ok().map(|r| r.command);
    let payload_len = len.saturating_sub(crate::protocol::HEADER_SIZE);
    let status = dispatcher.decode_and_dispatch(&mut frame, len);
    match command {
        Some(cmd) => ctx.logger.debug(format!("{cmd} -> {status}")),
        None => ctx.logger.debug(format!("rejected {len} byte packet")),
    }

    link.write_all_bytes(&frame)?;
    if ctx.ack == AckMode::Text {
        let ack = if status.is_ok() { ACK_OK } else { ACK_ERROR };
        link.write_all_bytes(ack)?;
    }

    if let Some(journal) = ctx.journal {
        if let Err(err) = journal.record_packet(command, status, payload_len) {
            ctx.logger.warn(format!("journal write failed: {err}"));
        }
    }

    write_notices(link, dispatcher, ctx.logger)
}

fn write_notices<L, F, D>(
    link: &mut L,
    dispatcher: &Dispatcher<F, D>,
    logger: &Logger,
) -> Result<()>
where
    L: Link,
    F: FlashFs + 'static,
    D: Display + 'static,
{
    for notice in dispatcher.drain_notices() {
        match notice {
            Notice::Raw(bytes) => link.write_all_bytes(&bytes)?,
            Notice::Clock(time) => logger.info(format!("host set clock to {time}")),
        }
    }
    Ok(())
}
