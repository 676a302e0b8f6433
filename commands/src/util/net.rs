//! Network plumbing over the socket service.

use async_trait::async_trait;
use coral_proc::INTERRUPT_EXIT_CODE;

use crate::Command;
use crate::Invocation;
use crate::args::OptSpec;

/// Minimal netcat: connect, pump stdin to the peer and the peer to stdout
/// until either side hangs up or the command is interrupted.
pub struct Nc;

#[async_trait]
impl Command for Nc {
    fn name(&self) -> &'static str {
        "nc"
    }

    fn description(&self) -> &'static str {
        "Open a connection and pipe bytes both ways"
    }

    fn usage_line(&self) -> &'static str {
        "[-u] HOST PORT"
    }

    fn options(&self) -> &'static [OptSpec] {
        const OPTS: &[OptSpec] = &[OptSpec::flag("udp", 'u', "use datagrams instead of a stream")];
        OPTS
    }

    async fn run(&self, inv: &mut Invocation) -> anyhow::Result<i32> {
        let positionals = inv.args.positionals().to_vec();
        let [host, port] = positionals.as_slice() else {
            inv.writeln_stderr("nc: expected HOST and PORT").await;
            return Ok(2);
        };
        let addr = format!("{host}:{port}");
        let connect = if inv.args.has("udp") {
            inv.services.sockets.connect_datagram(&addr).await
        } else {
            inv.services.sockets.connect_stream(&addr).await
        };
        let socket = match connect {
            Ok(socket) => socket,
            Err(err) => {
                inv.writeln_stderr(&format!("nc: {err}")).await;
                return Ok(1);
            }
        };

        // Peer → stdout.
        let incoming = socket.incoming();
        let stdout = inv.stdout_writer();
        let downstream = tokio::spawn(async move {
            let Some(mut writer) = stdout else {
                return;
            };
            let Ok(mut reader) = incoming.lock() else {
                return;
            };
            while let Some(chunk) = reader.read().await {
                if writer.write(chunk).await.is_err() {
                    break;
                }
            }
        });

        // Stdin → peer.
        let upstream_status = match (&inv.stdin, socket.outgoing().lock()) {
            (Some(stdin), Ok(mut sender)) => match stdin.lock() {
                Ok(mut reader) => loop {
                    if inv.cancel.is_cancelled() {
                        break INTERRUPT_EXIT_CODE;
                    }
                    match reader.read().await {
                        Some(chunk) => {
                            if sender.write(chunk).await.is_err() {
                                break 0;
                            }
                        }
                        None => {
                            sender.close();
                            break 0;
                        }
                    }
                },
                Err(_) => 0,
            },
            _ => 0,
        };

        tokio::select! {
            _ = downstream => {}
            _ = inv.cancel.cancelled() => {}
        }
        socket.close();
        Ok(upstream_status)
    }
}
