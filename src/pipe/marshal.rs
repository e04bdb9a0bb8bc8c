//! Wire encoding of main channel messages.
//!
//! All integers are little endian. Strings are sent with a length prefix
//! that counts the trailing NUL.
//!
//! Migration destination layout (begin, begin-seamless, switch-host):
//! ```text
//! +0   port (LE16)
//! +2   secure port (LE16)
//! +4   host size incl. NUL (LE32)
//! +8   host bytes, NUL
//! ...  cert subject size incl. NUL, 0 if absent (LE32)
//! ...  cert subject bytes, NUL
//! ```

use bytes::{BufMut, BytesMut};

use super::message::{Message, Notify};
use crate::core::{EncodeError, ZERO_BUF_SIZE};
use crate::migration::MigrationTarget;

static ZERO_PAGE: [u8; ZERO_BUF_SIZE] = [0; ZERO_BUF_SIZE];

/// Serializes a resolved [`Message`] body into an output buffer.
pub trait WireEncoder {
    /// Append the body of `message` to `out`.
    fn encode(&mut self, message: &Message<'_>, out: &mut BytesMut) -> Result<(), EncodeError>;
}

/// Reference marshaller for the main channel wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireMarshaller;

impl WireMarshaller {
    /// Create a marshaller.
    pub fn new() -> Self {
        Self
    }
}

impl WireEncoder for WireMarshaller {
    fn encode(&mut self, message: &Message<'_>, out: &mut BytesMut) -> Result<(), EncodeError> {
        match message {
            Message::Ping { ping, padding } => {
                out.reserve(12 + padding);
                out.put_u32_le(ping.id);
                out.put_u64_le(ping.timestamp);
                let mut left = *padding;
                while left > 0 {
                    let now = left.min(ZERO_BUF_SIZE);
                    out.put_slice(&ZERO_PAGE[..now]);
                    left -= now;
                }
            }
            Message::AgentTokens(tokens) | Message::AgentConnectedTokens(tokens) => {
                out.put_u32_le(*tokens);
            }
            Message::AgentData(data) => out.put_slice(data),
            Message::Init(init) => {
                out.put_u32_le(init.session_id);
                out.put_u32_le(init.display_channels_hint);
                out.put_u32_le(init.supported_mouse_modes);
                out.put_u32_le(init.current_mouse_mode);
                out.put_u32_le(u32::from(init.agent_connected));
                out.put_u32_le(init.agent_tokens);
                out.put_u32_le(init.multi_media_time);
                out.put_u32_le(init.ram_hint);
            }
            Message::Name(name) => put_cstr(out, name)?,
            Message::Uuid(uuid) => out.put_slice(uuid.as_bytes()),
            Message::Notify(notify) => put_notify(out, notify)?,
            Message::MouseMode {
                supported_modes,
                current_mode,
            } => {
                out.put_u16_le(*supported_modes);
                out.put_u16_le(*current_mode);
            }
            Message::MultiMediaTime(time) => out.put_u32_le(*time),
            Message::MigrateBegin(target) | Message::MigrateSwitchHost(target) => {
                put_target(out, target)?;
            }
            Message::MigrateBeginSeamless {
                target,
                src_version,
            } => {
                put_target(out, target)?;
                out.put_u32_le(*src_version);
            }
            Message::MigrateData(blob) => out.put_slice(blob),
            Message::ChannelsList(channels) => {
                out.put_u32_le(channels.len() as u32);
                for channel in channels {
                    out.put_u8(channel.channel_type);
                    out.put_u8(channel.id);
                }
            }
            Message::AgentDisconnected { error_code } => out.put_u32_le(*error_code),
            Message::MigrateCancel
            | Message::MigrateEnd
            | Message::MigrateDstSeamlessAck
            | Message::MigrateDstSeamlessNack => {}
        }
        Ok(())
    }
}

fn cstr_len(s: &str) -> Result<u32, EncodeError> {
    if s.as_bytes().contains(&0) {
        return Err(EncodeError::InvalidString);
    }
    u32::try_from(s.len() + 1).map_err(|_| EncodeError::StringTooLong(s.len()))
}

fn put_cstr(out: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    let len = cstr_len(s)?;
    out.put_u32_le(len);
    out.put_slice(s.as_bytes());
    out.put_u8(0);
    Ok(())
}

fn put_notify(out: &mut BytesMut, notify: &Notify<'_>) -> Result<(), EncodeError> {
    let len = cstr_len(notify.text)?;
    out.put_u64_le(notify.timestamp_ns);
    out.put_u32_le(notify.severity);
    out.put_u32_le(notify.visibility);
    out.put_u32_le(notify.what);
    // message_len excludes the NUL, which still goes on the wire
    out.put_u32_le(len - 1);
    out.put_slice(notify.text.as_bytes());
    out.put_u8(0);
    Ok(())
}

fn put_target(out: &mut BytesMut, target: &MigrationTarget) -> Result<(), EncodeError> {
    out.put_u16_le(target.port);
    out.put_u16_le(target.sport);
    put_cstr(out, &target.host)?;
    match &target.cert_subject {
        Some(subject) => put_cstr(out, subject)?,
        None => out.put_u32_le(0),
    }
    Ok(())
}
