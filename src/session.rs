//! Top-level orchestration: the client-side filter that demultiplexes the
//! carrier, and the sender/receiver drivers that run a transfer to
//! completion once the trigger fires (§2 System Overview).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::carrier::{Detector, LineBuffer, ReadLinePolicy};
use crate::control::Lifecycle;
use crate::error::TrzError;
use crate::model::{Dialect, SourceEntry, TransferAction, TransferMode};
use crate::pipeline::{channel::TransferStats, Receiver, Sender};
use crate::protocol::{self, handshake, MessageType};

/// Client-side interposer sitting between the user's terminal and the
/// carrier. While idle it passes bytes through verbatim; a detected trigger
/// diverts carrier bytes into the transfer engine (§2).
pub struct Filter {
    detector: Detector,
    /// Enforces "only one transfer may be active at a time per endpoint"
    /// (§5 Ordering guarantees) via compare-and-swap.
    transfer_active: Arc<AtomicBool>,
    tunnel_configured: bool,
}

impl Filter {
    pub fn new(tunnel_configured: bool) -> Self {
        Filter {
            detector: Detector::new(),
            transfer_active: Arc::new(AtomicBool::new(false)),
            tunnel_configured,
        }
    }

    /// Feed one chunk of carrier-to-client output through the filter.
    /// Returns the bytes that should reach the user's terminal (with the
    /// trigger literal rewritten so it doesn't retrigger downstream) and,
    /// on a fresh trigger, the parsed record to act on.
    pub fn process_output(&mut self, bytes: &[u8]) -> (Vec<u8>, Option<crate::model::TriggerRecord>) {
        if self.transfer_active.load(Ordering::Acquire) {
            // While a transfer owns the carrier, output is diverted
            // entirely to the transfer engine by the caller; the filter
            // itself does not scan it for a nested trigger.
            return (bytes.to_vec(), None);
        }
        self.detector.scan(bytes, self.tunnel_configured)
    }

    /// Attempt to claim the single active-transfer slot. Returns a guard
    /// that releases it on drop.
    pub fn claim_transfer(&self) -> Option<TransferGuard> {
        self.transfer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransferGuard {
                flag: self.transfer_active.clone(),
            })
    }
}

pub struct TransferGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Run the sender side of a transfer end to end: handshake, per-entry loop
/// (§4.4), `EXIT` summary. `entries` must already be in their final
/// (archive-collapsed, if applicable) order.
pub async fn run_sender<W>(
    carrier_out: &mut W,
    carrier_in: &LineBuffer,
    local_action: &TransferAction,
    entries: &[SourceEntry],
    directory: bool,
    lifecycle: &Lifecycle,
) -> Result<TransferStats, TrzError>
where
    W: AsyncWrite + Unpin,
{
    let wire = handshake::ActWire::from_action(local_action);
    protocol::write_line(carrier_out, local_action.dialect, MessageType::Act, &wire.encode()?).await?;

    let ack_line = protocol::read_line(carrier_in, policy_for(local_action.dialect), None).await?;
    if ack_line.msg_type != MessageType::Act {
        return Err(TrzError::Protocol("expected ACT in response".into()));
    }
    let remote_action = handshake::ActWire::decode(&ack_line.payload)?.into_action()?;
    if !remote_action.confirm {
        protocol::write_line(
            carrier_out,
            local_action.dialect,
            MessageType::Exit,
            &protocol::encode_message_payload("Cancelled"),
        )
        .await?;
        return Err(TrzError::RemoteExit("Cancelled".into()));
    }

    let cfg = handshake::negotiate(local_action.protocol_version, local_action.dialect, &remote_action, directory)?;
    let cfg_wire = handshake::CfgWire::from_config(&cfg);
    protocol::write_line(carrier_out, cfg.dialect(), MessageType::Cfg, &cfg_wire.encode()?).await?;

    protocol::write_line(carrier_out, cfg.dialect(), MessageType::Num, &entries.len().to_string()).await?;
    expect_succ(carrier_in, cfg.dialect(), &entries.len().to_string()).await?;

    let sender = Sender::new(cfg.clone());
    let mut stats = TransferStats::default();
    let pause = lifecycle.pause_flag();
    let cancel = lifecycle.cancellation_token();

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(TrzError::Stopped);
        }

        let name_payload = if directory {
            let msg = crate::protocol::NameMessage {
                path_id: entry.path_id,
                relative_path: entry.relative_path.clone(),
                is_dir: entry.is_dir,
                archive: entry.archive,
                permissions: entry.permissions,
                size: entry.size,
            };
            msg.encode()?
        } else {
            crate::codec::short_field_encode(entry.file_name().as_bytes())
        };
        protocol::write_line(carrier_out, cfg.dialect(), MessageType::Name, &name_payload).await?;
        let assigned = expect_succ_value(carrier_in, cfg.dialect()).await?;
        let _ = assigned;

        if entry.is_dir {
            continue;
        }

        protocol::write_line(carrier_out, cfg.dialect(), MessageType::Size, &entry.size.to_string()).await?;
        expect_succ(carrier_in, cfg.dialect(), &entry.size.to_string()).await?;

        let mut file = File::open(&entry.absolute_path).await?;
        sender
            .send_file(&mut file, carrier_out, carrier_in, &pause, &cancel)
            .await?;

        stats.files_ok += 1;
        stats.bytes_transferred += entry.size;
    }

    protocol::write_line(
        carrier_out,
        cfg.dialect(),
        MessageType::Exit,
        &protocol::encode_message_payload(&format!("sent {} file(s)", stats.files_ok)),
    )
    .await?;

    Ok(stats)
}

/// Run the receiver side of a transfer end to end (§4.4 per-entry loop,
/// receiver side).
pub async fn run_receiver<W>(
    carrier_out: &mut W,
    carrier_in: &LineBuffer,
    local_action: &TransferAction,
    dest_root: &std::path::Path,
    lifecycle: &Lifecycle,
) -> Result<TransferStats, TrzError>
where
    W: AsyncWrite + Unpin,
{
    let hello_line = protocol::read_line(carrier_in, policy_for(local_action.dialect), None).await?;
    if hello_line.msg_type != MessageType::Act {
        return Err(TrzError::Protocol("expected ACT to start handshake".into()));
    }
    let sender_action = handshake::ActWire::decode(&hello_line.payload)?.into_action()?;

    let wire = handshake::ActWire::from_action(local_action);
    protocol::write_line(carrier_out, local_action.dialect, MessageType::Act, &wire.encode()?).await?;

    let cfg_line = protocol::read_line(carrier_in, policy_for(sender_action.dialect), None).await?;
    if cfg_line.msg_type != MessageType::Cfg {
        return Err(TrzError::Protocol("expected CFG after handshake".into()));
    }
    let cfg = handshake::CfgWire::decode(&cfg_line.payload)?.into_config();

    let num_line = protocol::read_line(carrier_in, policy_for(cfg.dialect()), None).await?;
    if num_line.msg_type != MessageType::Num {
        return Err(TrzError::Protocol("expected NUM".into()));
    }
    let count: usize = num_line
        .payload
        .parse()
        .map_err(|e| TrzError::Protocol(format!("bad NUM payload: {e}")))?;
    protocol::write_line(carrier_out, cfg.dialect(), MessageType::Succ, &count.to_string()).await?;

    let receiver = Receiver::new(cfg.clone());
    let mut stats = TransferStats::default();

    for _ in 0..count {
        let name_line = protocol::read_line(carrier_in, policy_for(cfg.dialect()), None).await?;
        if name_line.msg_type != MessageType::Name {
            return Err(TrzError::Protocol("expected NAME".into()));
        }

        let (relative, is_dir) = if cfg.directory {
            let msg = crate::protocol::NameMessage::decode(&name_line.payload)?;
            (msg.relative_path, msg.is_dir)
        } else {
            let bytes = crate::codec::short_field_decode(&name_line.payload)?;
            let name = String::from_utf8(bytes).map_err(|e| TrzError::Corrupt(e.to_string()))?;
            (vec![name], false)
        };

        let candidate = crate::pipeline::validate_path(dest_root, &relative)?;
        let resolved = crate::pipeline::resolve_name(&candidate, cfg.overwrite).await?;
        let local_name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if is_dir {
            tokio::fs::create_dir_all(&resolved).await?;
            protocol::write_line(
                carrier_out,
                cfg.dialect(),
                MessageType::Succ,
                &crate::codec::short_field_encode(local_name.as_bytes()),
            )
            .await?;
            stats.files_ok += 1;
            continue;
        }

        lifecycle.record_created(resolved.clone()).await;
        protocol::write_line(
            carrier_out,
            cfg.dialect(),
            MessageType::Succ,
            &crate::codec::short_field_encode(local_name.as_bytes()),
        )
        .await?;

        let size_line = protocol::read_line(carrier_in, policy_for(cfg.dialect()), None).await?;
        if size_line.msg_type != MessageType::Size {
            return Err(TrzError::Protocol("expected SIZE".into()));
        }
        protocol::write_line(carrier_out, cfg.dialect(), MessageType::Succ, &size_line.payload).await?;

        let mut file = File::create(&resolved).await?;
        receiver.receive_file(carrier_in, carrier_out, &mut file).await?;
        file.flush().await?;

        stats.files_ok += 1;
        stats.bytes_transferred += size_line.payload.parse().unwrap_or(0);
    }

    let exit_line = protocol::read_line(carrier_in, policy_for(cfg.dialect()), None).await?;
    match exit_line.msg_type {
        MessageType::Exit => Ok(stats),
        MessageType::FatalFail => Err(TrzError::RemoteFail(protocol::decode_message_payload(&exit_line.payload)?)),
        _ => Err(TrzError::Protocol("expected EXIT to close transfer".into())),
    }
}

fn policy_for(dialect: Dialect) -> ReadLinePolicy {
    match dialect {
        Dialect::Windows => ReadLinePolicy::Windows,
        Dialect::Unix => ReadLinePolicy::Unix,
    }
}

async fn expect_succ(carrier_in: &LineBuffer, dialect: Dialect, expected: &str) -> Result<(), TrzError> {
    let line = protocol::read_line(carrier_in, policy_for(dialect), None).await?;
    if line.msg_type != MessageType::Succ || line.payload != expected {
        return Err(TrzError::Protocol(format!(
            "expected SUCC={expected}, got {:?}={:?}",
            line.msg_type, line.payload
        )));
    }
    Ok(())
}

async fn expect_succ_value(carrier_in: &LineBuffer, dialect: Dialect) -> Result<String, TrzError> {
    let line = protocol::read_line(carrier_in, policy_for(dialect), None).await?;
    if line.msg_type != MessageType::Succ {
        return Err(TrzError::Protocol(format!("expected SUCC, got {:?}", line.msg_type)));
    }
    Ok(line.payload)
}

/// Derive a mode-appropriate default local [`TransferAction`] before a
/// handshake is negotiated.
pub fn default_action(mode: TransferMode, protocol_version: u32) -> TransferAction {
    TransferAction {
        dialect: Dialect::Unix,
        protocol_version,
        confirm: true,
        supports_binary: true,
        supports_directory: mode.is_directory(),
        supports_fork: false,
    }
}

/// Build the sender's source-entry list for a flat (non-directory) upload.
pub fn plain_source_entries(paths: &[PathBuf], sizes: &[u64]) -> Vec<SourceEntry> {
    paths
        .iter()
        .zip(sizes)
        .enumerate()
        .map(|(i, (path, &size))| SourceEntry {
            path_id: i as u64,
            absolute_path: path.clone(),
            relative_path: vec![path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()],
            is_dir: false,
            archive: false,
            size,
            permissions: 0o644,
            header_payload: None,
            children: Vec::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_transfer_enforces_single_active_slot() {
        let filter = Filter::new(false);
        let guard1 = filter.claim_transfer();
        assert!(guard1.is_some());
        assert!(filter.claim_transfer().is_none());
        drop(guard1);
        assert!(filter.claim_transfer().is_some());
    }

    #[test]
    fn process_output_passes_through_while_transfer_active() {
        let mut filter = Filter::new(false);
        let _guard = filter.claim_transfer().unwrap();
        let (out, record) = filter.process_output(b"::TRZSZ:TRANSFER:R:1.1.0:1700000000000\r\n");
        assert!(record.is_none());
        assert_eq!(out, b"::TRZSZ:TRANSFER:R:1.1.0:1700000000000\r\n");
    }
}
