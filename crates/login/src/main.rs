// psologin -- terminates the per-variant client handshake described in
// spec.md §4.3 and maintains the service's one outbound shipgate link.
//
// Ground truth: original_source/trunk/login_server/src/login_server.c's
// accept loop, reworked onto the same `mio` reactor pattern as
// redirector/shipgate, with account-store calls pushed onto a
// `WorkerPool` so a slow query never stalls every other client's I/O
// (spec.md §5).

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use tracing::{info, warn};

use psocore::client::{Client, ClientPhase, ClientVariant};
use psocore::config::SylverantConfig;
use psocore::crypto::CipherPair;
use psocore::db::sqlite::SqliteAccountStore;
use psocore::db::AccountStore;
use psocore::error::{ProtoError, Result as ProtoResult};
use psocore::proto::{build_client_welcome, server_cipher_pair, HeaderKind, PacketHeader};
use psocore::quests::QuestList;
use psocore::reactor::{poll_timeout, ClientId, ReactorPoll, TokenTable, WorkerPool};
use psocore::shipgate::packets::SHDR_TYPE_SSTATUS;
use psocore::shipgate::{
    fresh_nonce, parse_ship_status, respond_to_welcome, ParsedShipStatus, ShipCapFlags, ShipRecord,
    ShipRoster,
};

mod handlers;
mod packets;

use handlers::{apply_account_job_outcome, run_account_job, AccountJobOutcome, DispatchOutcome};

/// DC v1/v2 client ports; mirrors the redirector's own `DC_PORTS`.
const DC_PORTS: [u16; 2] = [9200, 9201];
const PC_PORT: u16 = 9300;
const GC_PORTS: [u16; 3] = [9100, 9000, 9001];

const SHIPGATE_TOKEN: Token = Token(usize::MAX - 1);

#[derive(Parser, Debug)]
#[command(name = "psologin", version, about = "PSO login service")]
struct Args {
    /// Path to the service's TOML configuration file.
    config: PathBuf,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy)]
enum ListenKind {
    Dc(usize),
    Pc,
    Gc(usize),
}

impl ListenKind {
    fn variant(self) -> ClientVariant {
        match self {
            ListenKind::Dc(0) => ClientVariant::DcV1,
            ListenKind::Dc(_) => ClientVariant::DcV2,
            ListenKind::Pc => ClientVariant::Pc,
            ListenKind::Gc(_) => ClientVariant::Gc,
        }
    }
}

struct LoginConn {
    client: Client<TcpStream>,
    addr: SocketAddr,
    client_id: ClientId,
    /// Set while an `AccountJob` is in flight for this connection; a
    /// second login packet arriving before the reply comes back is
    /// rejected rather than racing a second job against the first.
    job_in_flight: bool,
}

enum GateLinkPhase {
    AwaitWelcome,
    Established,
}

/// The login service's single outbound session to the shipgate
/// (spec.md §4.3 "login service also maintains a session to
/// Shipgate"). Reuses the same recv/send/cipher plumbing every
/// client-facing connection uses.
struct GateLink {
    stream: TcpStream,
    recv: psocore::client::RecvBuffer,
    send: psocore::client::SendBuffer,
    cipher: CipherPair,
    phase: GateLinkPhase,
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
    let quests = QuestList::default();
    let roster = ShipRoster::new();
    let pool: WorkerPool<AccountJobOutcome> = WorkerPool::new(4, 64, 64);

    let mut reactor = ReactorPoll::new(256)?;
    let mut tokens = TokenTable::new();
    let mut conns: HashMap<Token, LoginConn> = HashMap::new();

    let mut listeners = Vec::new();
    let mut listener_tokens: HashMap<Token, ListenKind> = HashMap::new();

    for (idx, &port) in DC_PORTS.iter().enumerate() {
        register_listener(&mut reactor, &mut listeners, &mut listener_tokens, port, ListenKind::Dc(idx))?;
    }
    register_listener(&mut reactor, &mut listeners, &mut listener_tokens, PC_PORT, ListenKind::Pc)?;
    for (idx, &port) in GC_PORTS.iter().enumerate() {
        register_listener(&mut reactor, &mut listeners, &mut listener_tokens, port, ListenKind::Gc(idx))?;
    }

    let mut gate_link = connect_shipgate(&mut reactor, config.shipgate_ip, config.shipgate_port)?;

    info!(
        shipgate = %config.shipgate_ip,
        port = config.shipgate_port,
        "login service up, dialing shipgate"
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
                if let Err(e) = service_gate_link(&mut gate_link, &roster) {
                    warn!(error = %e, "shipgate link failed, login is flying blind on ship roster");
                }
                continue;
            }

            let mut drop_conn = false;
            if let Some(conn) = conns.get_mut(&token) {
                match service_client(conn, &roster, &quests, &store, &pool) {
                    Ok(()) => {}
                    Err(e) => {
                        warn!(addr = %conn.addr, error = %e, "dropping login client");
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

        for result in pool.drain_results() {
            if !tokens.is_current(result.client) {
                continue; // client already disconnected; discard stale result
            }
            if let Some(conn) = conns.get_mut(&result.client.token) {
                conn.job_in_flight = false;
                if let Err(e) = apply_account_job_outcome(&mut conn.client, result.value) {
                    warn!(addr = %conn.addr, error = %e, "account job reply failed");
                    if let Some(conn) = conns.remove(&result.client.token) {
                        tokens.retire(conn.client_id.token);
                    }
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
    conns: &mut HashMap<Token, LoginConn>,
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

                let variant = kind.variant();
                let mut client = Client::new(stream, variant);

                let server_key = fresh_key();
                let client_key = fresh_key();
                let copyright = "PSOcore login server. All rights reserved.";
                let mut welcome = build_client_welcome(variant.header_kind(), server_key, client_key, copyright);
                if let Err(e) = client.send_raw(&mut welcome) {
                    warn!(%addr, error = %e, "welcome send failed");
                    tokens.retire(conn_token);
                    continue;
                }
                client.cipher = server_cipher_pair(matches!(variant, ClientVariant::Pc), server_key, client_key);
                client.phase = ClientPhase::AwaitLogin;

                conns.insert(
                    conn_token,
                    LoginConn {
                        client,
                        addr,
                        client_id,
                        job_in_flight: false,
                    },
                );
                info!(%addr, ?variant, "client connected");
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
    let nonce = fresh_nonce();
    u32::from_le_bytes(nonce)
}

fn service_client(
    conn: &mut LoginConn,
    roster: &ShipRoster,
    quests: &QuestList,
    store: &Arc<dyn AccountStore>,
    pool: &WorkerPool<AccountJobOutcome>,
) -> ProtoResult<()> {
    conn.client.drain_send()?;

    if !conn.client.recv.fill(&mut conn.client.stream)? {
        return Ok(());
    }

    let kind = conn.client.variant.header_kind();
    while let Some(packet) = conn.client.recv.take_packet(kind, &mut conn.client.cipher)? {
        if conn.job_in_flight {
            return Err(ProtoError::HandlerLogic("second login packet while a lookup is pending"));
        }

        match handlers::dispatch(&mut conn.client, roster, quests, &packet)? {
            DispatchOutcome::Handled => {}
            DispatchOutcome::NeedsAccountJob(job) => {
                let store = Arc::clone(store);
                let submitted = pool.submit(conn.client_id, move || run_account_job(store.as_ref(), job));
                match submitted {
                    Ok(()) => conn.job_in_flight = true,
                    Err(_) => return Err(ProtoError::ResourceExhaustion("account job queue full")),
                }
            }
        }
    }

    Ok(())
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

fn service_gate_link(link: &mut GateLink, roster: &ShipRoster) -> ProtoResult<()> {
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
                if header.pkt_type == SHDR_TYPE_SSTATUS {
                    let status = parse_ship_status(&packet)?;
                    apply_ship_status(roster, status);
                }
                // Count/ping/forward/error handling follows the same
                // shape as the shipgate's own service loop and is left
                // for the ship-select forwarding path to wire in.
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
