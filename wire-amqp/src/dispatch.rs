use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connection::{AmqpConnectionReader, ConnectionShared, ConnectionState};
use super::defines::*;
use super::error::{AmqpError, AmqpResult};
use super::frame::{AmqpFrame, AmqpFramePayload, AmqpMethod};

const DISPATCH_TICK: Duration = Duration::from_secs(1);

/// Body of the per-connection dispatch thread. Reads frames until the connection dies and
/// routes each one to its session. Also drives heartbeats when they were negotiated.
pub(crate) fn run(shared: Arc<ConnectionShared>, mut reader: AmqpConnectionReader) {
    let heartbeat = shared.heartbeat_interval();
    let tick = match heartbeat {
        Some(interval) => (interval / 2).min(DISPATCH_TICK),
        None => DISPATCH_TICK,
    };

    let mut last_received = Instant::now();
    diag!(shared.diagnostics, Trace, "dispatch loop started, tick {:?}", tick);

    loop {
        match reader.read_frame(Instant::now() + tick) {
            Ok(Some(frame)) => {
                last_received = Instant::now();
                diag!(shared.diagnostics, Debug, "recv {}", frame);

                if let Err(error) = dispatch_frame(&shared, frame) {
                    abort(&shared, AMQP_REPLY_UNEXPECTED_FRAME, error);
                    break;
                }
            },
            Ok(None) => {},
            Err(error) => {
                if shared.state() != ConnectionState::Closed {
                    abort(&shared, AMQP_REPLY_FRAME_ERROR, error);
                }
                break;
            },
        }

        if shared.state() == ConnectionState::Closed {
            break;
        }

        if let Some(interval) = heartbeat {
            if last_received.elapsed() >= interval * 2 {
                diag!(shared.diagnostics, Error, "no traffic from broker for {:?}", last_received.elapsed());
                shared.mark_dead(AmqpError::Transport("missed heartbeats".to_string()));
                break;
            }

            if shared.idle_for() >= interval && shared.send_heartbeat().is_err() {
                break;
            }
        }
    }

    diag!(shared.diagnostics, Trace, "dispatch loop finished");
}

/// Kills the connection after a failure on the read side. Protocol violations are reported
/// to the broker first, best effort.
fn abort(shared: &ConnectionShared, reply_code: u16, error: AmqpError) {
    match &error {
        AmqpError::Framing(_) | AmqpError::UnexpectedFrame(..) => {
            diag!(shared.diagnostics, Error, "protocol violation - {}", error);
            let close = AmqpMethod::ConnectionClose(reply_code, error.to_string(), 0, 0);
            let _ = shared.send_method(0, close);
        },
        _ => diag!(shared.diagnostics, Warn, "connection lost - {}", error),
    }

    shared.mark_dead(error);
}

fn dispatch_frame(shared: &ConnectionShared, frame: AmqpFrame) -> AmqpResult<()> {
    if frame.channel == 0 {
        handle_connection_frame(shared, frame);
        return Ok(());
    }

    let session = match shared.find_session(frame.channel) {
        Some(session) => session,
        None => {
            diag!(shared.diagnostics, Debug, "dropping {}, channel not open", frame);
            return Ok(());
        },
    };

    // close-ok must be out and the channel number free before any waiter wakes up
    if let AmqpFramePayload::Method(AmqpMethod::ChannelClose(..)) = &frame.payload {
        shared.send_method(session.channel(), AmqpMethod::ChannelCloseOk())?;
        shared.remove_session(&session);
    }

    if let Some(reply) = session.handle_frame(frame)? {
        shared.send_method(session.channel(), reply)?;
    }

    Ok(())
}

fn handle_connection_frame(shared: &ConnectionShared, frame: AmqpFrame) {
    let description = frame.to_string();

    match frame.payload {
        AmqpFramePayload::Heartbeat() => {},
        AmqpFramePayload::Method(AmqpMethod::ConnectionClose(code, text, class_id, method_id)) => {
            let error = AmqpError::ConnectionClosedByServer(code, text, class_id, method_id);
            if code == AMQP_REPLY_SUCCESS {
                diag!(shared.diagnostics, Info, "broker closed the connection");
            } else {
                diag!(shared.diagnostics, Warn, "{}", error);
            }

            shared.set_state(ConnectionState::Closing);
            let _ = shared.send_method(0, AmqpMethod::ConnectionCloseOk());
            shared.mark_dead(error);
        },
        AmqpFramePayload::Method(AmqpMethod::ConnectionCloseOk()) => {
            if !shared.close_confirmed() {
                diag!(shared.diagnostics, Warn, "ignoring {}, no close in progress", description);
            }
        },
        _ => diag!(shared.diagnostics, Warn, "ignoring {}", description),
    }
}
