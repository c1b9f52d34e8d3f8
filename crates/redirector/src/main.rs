// psoredirector -- terminates a connection just long enough to answer
// a handshake-less "go elsewhere" packet (spec.md §3.2, §4.2).
//
// Ground truth: original_source/redirector/src/redirector.c's
// `run_server`: one `select()` loop over six listening sockets with a
// 9001-second timeout, each readable listener accepted and answered
// once, then closed. Reworked onto `mio::Poll` instead of `select`.

use std::io::Write;
use std::net::{Ipv4Addr, TcpListener as StdTcpListener};

use clap::Parser;
use mio::net::TcpListener;
use mio::{Interest, Token};
use tracing::{info, warn};

use psocore::proto::redirect::{build_redirect, build_selective_redirect};
use psocore::proto::HeaderKind;
use psocore::reactor::poll_timeout;
use psocore::reactor::ReactorPoll;

/// Dreamcast v1/v2 listening ports; client port is `9200 + index`.
const DC_PORTS: [u16; 2] = [9200, 9201];
const PC_PORT: u16 = 9300;
/// GameCube listening ports. Index 0 answers with a selective redirect
/// plus a 9100 target; indices 1 and 2 answer with `9000 + (index - 1)`.
const GC_PORTS: [u16; 3] = [9100, 9000, 9001];

#[derive(Parser, Debug)]
#[command(name = "psoredirector", version, about = "PSO redirection fabric")]
struct Args {
    /// Destination IP address every redirect packet points clients at.
    #[arg(short = 'S', value_name = "ipv4", required = true)]
    server_ip: Ipv4Addr,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut reactor = ReactorPoll::new(32)?;
    let mut listeners = Vec::new();
    let mut token_ports: Vec<(Token, Kind, u16)> = Vec::new();
    let mut next_token = 0usize;

    for (idx, &port) in DC_PORTS.iter().enumerate() {
        let mut listener = bind(port)?;
        let token = Token(next_token);
        next_token += 1;
        reactor
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        token_ports.push((token, Kind::Dc(idx), port));
        listeners.push(listener);
    }

    {
        let mut listener = bind(PC_PORT)?;
        let token = Token(next_token);
        next_token += 1;
        reactor
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        token_ports.push((token, Kind::Pc, PC_PORT));
        listeners.push(listener);
    }

    for (idx, &port) in GC_PORTS.iter().enumerate() {
        let mut listener = bind(port)?;
        let token = Token(next_token);
        next_token += 1;
        reactor
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        token_ports.push((token, Kind::Gc(idx), port));
        listeners.push(listener);
    }

    info!(ip = %args.server_ip, "redirector listening on {} sockets", listeners.len());

    loop {
        reactor
            .poll
            .poll(&mut reactor.events, Some(poll_timeout::REDIRECTOR_MAX_BLOCK))?;

        for event in reactor.events.iter() {
            let idx = event.token().0;
            let Some((_, kind, listen_port)) = token_ports.iter().find(|(t, ..)| t.0 == idx) else {
                continue;
            };

            loop {
                match listeners[idx].accept() {
                    Ok((stream, peer)) => {
                        if let Err(e) = handle_connection(stream, *kind, args.server_ip) {
                            warn!(%peer, error = %e, "redirect write failed");
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!(port = listen_port, error = %e, "accept failed");
                        break;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Dc(usize),
    Pc,
    Gc(usize),
}

fn bind(port: u16) -> std::io::Result<TcpListener> {
    let std_listener = StdTcpListener::bind(("0.0.0.0", port))?;
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

/// A redirect is one packet on a connection that is about to be
/// closed; there is no backpressure state worth keeping, so the write
/// goes straight out on the accepted mio stream without involving
/// `SendBuffer`.
fn handle_connection(mut stream: mio::net::TcpStream, kind: Kind, ip: Ipv4Addr) -> std::io::Result<()> {
    match kind {
        Kind::Dc(idx) => {
            let port = DC_PORTS[idx];
            let packet = build_redirect(HeaderKind::DcGc, ip, port);
            stream.write_all(&packet)?;
        }
        Kind::Pc => {
            let packet = build_redirect(HeaderKind::Pc, ip, PC_PORT);
            stream.write_all(&packet)?;
        }
        Kind::Gc(idx) => {
            // Sort out any PC users sharing this port first.
            let selective = build_selective_redirect(ip);
            stream.write_all(&selective)?;

            let packet = build_redirect(HeaderKind::DcGc, ip, GC_PORTS[idx]);
            stream.write_all(&packet)?;
        }
    }
    Ok(())
}
