//! Reset handshake

use super::capabilities::{HardwareCapabilities, Model, TERMINATOR};
use super::commands::Command;
use super::session::{Session, SessionState};
use super::ProtocolError;

impl Session {
    /// Reset the instrument and verify the link.
    ///
    /// Sends the priming byte, discards whatever is buffered, sends `R` and
    /// requires the exact identification line with nothing after it. This is
    /// the only operation accepted while the session is `ParameterUnknown`.
    /// The parameter cache is forgotten whatever the outcome.
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        let result = self.guarded(Command::Reset, |s, code| {
            let prime = Command::Prime.code(s.caps.model);
            s.transport.write_exact(prime, &[prime as u8])?;
            s.transport.drain_available()?;

            s.send_command(code)?;
            let expected = s.caps.reset_reply_len();
            let reply = match s.transport.read_exact(code, expected, s.timeouts.command) {
                Ok(reply) => reply,
                Err(ProtocolError::TimedOut { received, .. }) => {
                    return Err(ProtocolError::UnexpectedProtocol {
                        command: code,
                        reason: other_model(s.caps, &received).unwrap_or_else(|| {
                            format!("short reset reply, expected {} bytes", expected)
                        }),
                        received,
                    })
                }
                Err(e) => return Err(e),
            };

            let identified = reply.strip_suffix(TERMINATOR)
                == Some(s.caps.identification.as_bytes());
            if !identified {
                return Err(ProtocolError::UnexpectedProtocol {
                    command: code,
                    reason: other_model(s.caps, &reply).unwrap_or_else(|| {
                        format!("expected identification {}", s.caps.identification)
                    }),
                    received: reply,
                });
            }

            let trailing = s.transport.bytes_available()?;
            if trailing != 0 {
                return Err(ProtocolError::UnexpectedProtocol {
                    command: code,
                    reason: format!("{} unexpected bytes after identification", trailing),
                    received: reply,
                });
            }
            Ok(())
        });

        self.params.invalidate_all();
        if result.is_ok() {
            self.state = SessionState::Ready;
            tracing::info!(model = %self.caps.model, "reset OK");
        }
        result
    }
}

/// Reason naming the other generation when it is the one that answered
fn other_model(caps: &HardwareCapabilities, reply: &[u8]) -> Option<String> {
    let model = Model::from_identification(&String::from_utf8_lossy(reply))?;
    (model != caps.model)
        .then(|| format!("instrument is an {}, session expects {}", model, caps.model))
}
