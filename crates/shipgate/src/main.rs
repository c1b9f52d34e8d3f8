// psoshipgate -- the federation gateway every ship maintains one
// outbound session to (spec.md §3.3, §4.4).
//
// Ground truth: original_source/shipgate/src/packets.c for the wire
// shapes and `send_raw`'s buffer-then-retry pattern (now `SendBuffer`),
// generalized onto a single-threaded `mio` reactor per spec.md §5.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mio::net::TcpListener;
use mio::{Interest, Token};
use tracing::{info, warn};

use psocore::client::{send_packet, RecvBuffer, SendBuffer};
use psocore::config::SylverantConfig;
use psocore::crypto::{Cipher, CipherPair, Rc4State};
use psocore::db::sqlite::SqliteAccountStore;
use psocore::db::AccountStore;
use psocore::error::ProtoError;
use psocore::proto::{HeaderKind, PacketHeader};
use psocore::reactor::{poll_timeout, ReactorPoll};
use psocore::shipgate::{
    build_char_data, build_gm_login_reply, build_ping, build_ship_status, build_welcome,
    fresh_nonce, mix_handshake_key, parse_char_data_request, parse_forward_header,
    parse_gm_login_request,
    packets::{
        SHDR_TYPE_COUNT, SHDR_TYPE_CREQ, SHDR_TYPE_DC, SHDR_TYPE_ERROR, SHDR_TYPE_GMLOGIN,
        SHDR_TYPE_LOGIN, SHDR_TYPE_PC, SHDR_TYPE_PING,
    },
    ShipCapFlags, ShipRecord, ShipRoster, ShipStatusInfo,
};

#[derive(Parser, Debug)]
#[command(name = "psoshipgate", version, about = "PSO shipgate federation core")]
struct Args {
    /// Path to the gateway's TOML configuration file.
    config: PathBuf,

    /// Increase log verbosity (may be repeated).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

enum Phase {
    AwaitLogin { gate_nonce: [u8; 4] },
    Established { ship_id: u32 },
}

struct ShipConn {
    stream: mio::net::TcpStream,
    addr: SocketAddr,
    recv: RecvBuffer,
    send: SendBuffer,
    cipher: CipherPair,
    phase: Phase,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .init();

    let config = SylverantConfig::load(&args.config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let store: Arc<dyn AccountStore> = Arc::new(
        SqliteAccountStore::open(&config.database.db)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?,
    );

    let mut reactor = ReactorPoll::new(256)?;
    let std_listener = StdTcpListener::bind((config.server_ip, config.server_port))?;
    std_listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(std_listener);
    const LISTENER_TOKEN: Token = Token(usize::MAX);
    reactor
        .poll
        .registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let roster = ShipRoster::new();
    let mut conns: HashMap<Token, ShipConn> = HashMap::new();
    let mut ship_tokens: HashMap<u32, Token> = HashMap::new();
    let mut next_ship_id = 1u32;
    let mut next_token = 0usize;

    info!(addr = %config.server_ip, port = config.server_port, "shipgate listening");

    loop {
        reactor
            .poll
            .poll(&mut reactor.events, Some(poll_timeout::SERVICE_DEFAULT))?;

        let ready_tokens: Vec<Token> = reactor.events.iter().map(|e| e.token()).collect();

        for token in ready_tokens {
            if token == LISTENER_TOKEN {
                loop {
                    match listener.accept() {
                        Ok((mut stream, addr)) => {
                            let token = Token(next_token);
                            next_token += 1;
                            reactor.poll.registry().register(
                                &mut stream,
                                token,
                                Interest::READABLE | Interest::WRITABLE,
                            )?;

                            let gate_nonce = fresh_nonce();
                            let mut conn = ShipConn {
                                stream,
                                addr,
                                recv: RecvBuffer::new(),
                                send: SendBuffer::new(),
                                cipher: CipherPair::default(),
                                phase: Phase::AwaitLogin { gate_nonce },
                            };

                            let welcome = build_welcome(fresh_nonce(), gate_nonce, (1, 0, 0));
                            if let Err(e) = send_packet(&mut conn.send, &mut conn.stream, &welcome) {
                                warn!(%addr, error = %e, "welcome send failed");
                                continue;
                            }

                            conns.insert(token, conn);
                            info!(%addr, "ship connected, awaiting login");
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            break;
                        }
                    }
                }
                continue;
            }

            let mut drop_token = false;
            if let Some(conn) = conns.get_mut(&token) {
                match service_connection(conn, &roster, &store, &mut ship_tokens, token, &mut next_ship_id) {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(addr = %conn.addr, error = %e, "dropping shipgate connection");
                        drop_token = true;
                    }
                }
            }

            if drop_token {
                if let Some(conn) = conns.remove(&token) {
                    if let Phase::Established { ship_id } = conn.phase {
                        roster.remove(ship_id);
                        ship_tokens.remove(&ship_id);
                        roster.broadcast_status(build_ship_down(ship_id), ship_id);
                        info!(ship_id, "ship disconnected");
                    }
                }
            }
        }

        // Deliver whatever `ShipRoster::broadcast_status` queued for
        // each live connection since the last pass, preserving the
        // FIFO order the roster already enforces per peer (spec.md
        // §4.4, §8: "every broadcast ... delivered in the order
        // Shipgate observed").
        let pending: Vec<(Token, Vec<Vec<u8>>)> = ship_tokens
            .iter()
            .map(|(&ship_id, &token)| (token, roster.drain_pending_status_for(ship_id)))
            .filter(|(_, packets)| !packets.is_empty())
            .collect();
        for (token, packets) in pending {
            if let Some(conn) = conns.get_mut(&token) {
                for packet in packets {
                    if let Err(e) = send_packet(&mut conn.send, &mut conn.stream, &packet) {
                        warn!(error = %e, "status delivery failed");
                    }
                }
            }
        }
    }
}

fn build_ship_down(ship_id: u32) -> Vec<u8> {
    build_ship_status(&ShipStatusInfo {
        name: "",
        ship_id,
        ext_addr: 0,
        int_addr: 0,
        port: 0,
        up: false,
        flags: 0,
        clients: 0,
        games: 0,
        menu_code: 0,
    })
}

#[allow(clippy::too_many_arguments)]
fn service_connection(
    conn: &mut ShipConn,
    roster: &ShipRoster,
    store: &Arc<dyn AccountStore>,
    ship_tokens: &mut HashMap<u32, Token>,
    token: Token,
    next_ship_id: &mut u32,
) -> Result<(), ProtoError> {
    conn.send.drain(&mut conn.stream)?;

    if !conn.recv.fill(&mut conn.stream)? {
        return Ok(());
    }

    while let Some(packet) = conn.recv.take_packet(HeaderKind::Shipgate, &mut conn.cipher)? {
        handle_packet(conn, &packet, roster, store, ship_tokens, token, next_ship_id)?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_packet(
    conn: &mut ShipConn,
    packet: &[u8],
    roster: &ShipRoster,
    store: &Arc<dyn AccountStore>,
    ship_tokens: &mut HashMap<u32, Token>,
    token: Token,
    next_ship_id: &mut u32,
) -> Result<(), ProtoError> {
    let header = PacketHeader::decode(HeaderKind::Shipgate, packet)?;

    match (&conn.phase, header.pkt_type) {
        (Phase::AwaitLogin { gate_nonce }, SHDR_TYPE_LOGIN) => {
            if packet.len() < 8 + 32 + 4 {
                return Err(ProtoError::Framing("short shipgate login body"));
            }
            let ship_nonce = [packet[12], packet[13], packet[14], packet[15]];
            let key = mix_handshake_key(ship_nonce, *gate_nonce);
            conn.cipher.set(
                Cipher::Rc4(Rc4State::new(&key)),
                Cipher::Rc4(Rc4State::new(&key)),
            );

            let ext_v4 = match conn.addr.ip() {
                std::net::IpAddr::V4(v4) => v4,
                std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
            };

            // Tell the newcomer about every ship already on the roster
            // before anyone hears about the newcomer itself (spec.md
            // §4.4, §8 scenario 5: "Ship A connects ... Shipgate emits
            // zero SSTATUS to A (empty roster). Ship B connects; A
            // receives SSTATUS(up, B)").
            for existing in roster.snapshot() {
                let info = ShipStatusInfo {
                    name: &existing.name,
                    ship_id: existing.ship_id,
                    ext_addr: u32::from(existing.ext_addr),
                    int_addr: u32::from(existing.int_addr),
                    port: existing.port,
                    up: true,
                    flags: existing.flags.bits(),
                    clients: existing.clients,
                    games: existing.games,
                    menu_code: existing.menu_code,
                };
                let status = build_ship_status(&info);
                send_packet(&mut conn.send, &mut conn.stream, &status)?;
            }

            let ship_id = *next_ship_id;
            *next_ship_id += 1;

            let record = ShipRecord::new(
                ship_id,
                format!("ship-{ship_id}"),
                ext_v4,
                Ipv4Addr::UNSPECIFIED,
                conn.addr.port(),
                ShipCapFlags::empty(),
            );
            roster.insert(record);
            ship_tokens.insert(ship_id, token);
            conn.phase = Phase::Established { ship_id };

            let info = ShipStatusInfo {
                name: "",
                ship_id,
                ext_addr: u32::from(ext_v4),
                int_addr: 0,
                port: conn.addr.port(),
                up: true,
                flags: 0,
                clients: 0,
                games: 0,
                menu_code: 0,
            };
            roster.broadcast_status(build_ship_status(&info), ship_id);
            info!(ship_id, "ship handshake complete");
            Ok(())
        }
        (Phase::Established { ship_id }, SHDR_TYPE_PING) => {
            let is_reply = header.flags & psocore::shipgate::ShipgateFlags::RESPONSE.bits() != 0;
            if !is_reply {
                let reply = build_ping(true);
                send_packet(&mut conn.send, &mut conn.stream, &reply)?;
            }
            let _ = ship_id;
            Ok(())
        }
        (Phase::Established { ship_id }, SHDR_TYPE_COUNT) => {
            if packet.len() < 16 {
                return Err(ProtoError::Framing("short count packet"));
            }
            let clients = u16::from_be_bytes([packet[12], packet[13]]);
            let games = u16::from_be_bytes([packet[14], packet[15]]);
            roster.update_counts(*ship_id, clients, games);
            Ok(())
        }
        (Phase::Established { ship_id }, SHDR_TYPE_DC) | (Phase::Established { ship_id }, SHDR_TYPE_PC) => {
            // Structural validation only -- the embedded client packet's
            // game-logic contents (guildcard search, mail routing, ...)
            // are out of scope (spec.md §1 Non-goals). Per-ship delivery
            // of the forwarded envelope is a routing concern the ships
            // themselves own once connected directly to each other's
            // block servers; the gateway's job here ends at confirming
            // the envelope names its own sender.
            let forward = parse_forward_header(packet)?;
            if forward.ship_id != *ship_id {
                return Err(ProtoError::Framing("forward envelope ship_id does not match sender"));
            }
            Ok(())
        }
        (Phase::Established { .. }, SHDR_TYPE_CREQ) => {
            let req = parse_char_data_request(packet)?;
            match store.restore_character(req.guildcard, req.slot) {
                Ok(data) => {
                    let mut fixed = [0u8; psocore::shipgate::CHAR_DATA_LEN];
                    let n = data.len().min(fixed.len());
                    fixed[..n].copy_from_slice(&data[..n]);
                    let reply = build_char_data(req.guildcard, req.slot, &fixed);
                    send_packet(&mut conn.send, &mut conn.stream, &reply)?;
                }
                Err(e) => {
                    warn!(guildcard = req.guildcard, error = %e, "character restore failed");
                }
            }
            Ok(())
        }
        (Phase::Established { .. }, SHDR_TYPE_GMLOGIN) => {
            let req = parse_gm_login_request(packet)?;
            let privilege = store.gm_privilege(req.guildcard).unwrap_or(0);
            let reply = build_gm_login_reply(req.guildcard, req.block, privilege > 0, privilege);
            send_packet(&mut conn.send, &mut conn.stream, &reply)?;
            Ok(())
        }
        (Phase::Established { .. }, SHDR_TYPE_ERROR) => {
            warn!("received error packet from ship");
            Ok(())
        }
        (Phase::AwaitLogin { .. }, _other) => {
            Err(ProtoError::HandlerLogic("packet received before shipgate login"))
        }
        (Phase::Established { .. }, other) => {
            warn!(pkt_type = other, "unhandled shipgate packet type");
            Ok(())
        }
    }
}
