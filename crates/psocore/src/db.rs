// db.rs -- Account storage.
//
// Ground truth: original_source/trunk/login_server/src/dclogin.c. The
// original builds `sprintf`-escaped SQL by hand; `rusqlite`'s bound
// parameters remove the need for that step entirely, so `escape` here
// is a deliberate no-op kept only so the trait still names the
// operation the original source performs, for the account-store
// implementations that may still need it against their own backend.

use crate::crypto::verify_password;
use crate::error::{ProtoError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcAccount {
    pub guildcard: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcAccount {
    pub guildcard: u32,
    pub account_id: u32,
}

/// Storage for guildcard/account lookups across every client variant.
/// Kept object-safe so a service binary can hold it as
/// `Box<dyn AccountStore>` and swap the backend without touching
/// handler code.
pub trait AccountStore: Send + Sync {
    /// No-op under parameter binding; kept to name the operation the
    /// original hand-built queries performed explicitly.
    fn escape(&self, s: &str) -> String {
        s.to_owned()
    }

    /// `handle_login` -- DC v1 guildcard lookup, creating a fresh
    /// guildcard and client row on first contact.
    fn dc_v1_login(&self, dc_id: &str, serial: &str, access_key: &str) -> Result<DcAccount>;

    /// `handle_v2login` -- DC v2 lookup keyed on dc_id (or PC's
    /// migration path keyed on access_key alone when serial_number is
    /// still the placeholder `'0'`).
    fn dc_v2_or_pc_login(
        &self,
        is_pc: bool,
        dc_id: &str,
        serial: &str,
        access_key: &str,
    ) -> Result<DcAccount>;

    /// `handle_gchlcheck` / `handle_gcloginc` -- GameCube guildcard
    /// lookup by serial + access key.
    fn gc_login(&self, serial: &str, access_key: &str) -> Result<GcAccount>;

    /// Account password + regtime for the salted MD5 check performed
    /// against a GameCube client's `loginc` password packet.
    fn account_password_digest(&self, account_id: u32) -> Result<(String, String)>;

    fn check_gc_password(&self, account_id: u32, password: &str) -> Result<bool> {
        let (stored_digest, regtime) = self.account_password_digest(account_id)?;
        Ok(verify_password(password, &regtime, &stored_digest))
    }

    fn issue_guildcard(&self) -> Result<u32>;

    /// `GMLOGIN` -- the shipgate's own lookup for a forwarded GM
    /// authorization check (spec.md §4.4): 0 means "not a GM", any
    /// other value is the privilege level carried back in the reply.
    fn gm_privilege(&self, guildcard: u32) -> Result<u8>;

    /// `CREQ` -- character-data restore, a fixed 1052-byte blob the
    /// gateway owns on behalf of the requesting ship (spec.md §4.4).
    /// Returned length is the caller's responsibility to fit into
    /// `shipgate::CHAR_DATA_LEN`; the store itself treats it as an
    /// opaque blob (spec.md §1 Non-goals: "contents of in-game state").
    fn restore_character(&self, guildcard: u32, slot: u32) -> Result<Vec<u8>>;
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use rusqlite::{params, Connection};
    use std::sync::Mutex;

    /// Reference `AccountStore` over a single `rusqlite::Connection`.
    /// One mutex around the connection mirrors the original server's
    /// single global `sylverant_dbconn_t conn` -- account lookups run
    /// on a worker thread, never on the reactor, so contention here
    /// does not stall client I/O (spec.md §5).
    pub struct SqliteAccountStore {
        conn: Mutex<Connection>,
    }

    impl SqliteAccountStore {
        pub fn open(path: &str) -> Result<Self> {
            let conn = Connection::open(path).map_err(|e| ProtoError::Database(e.to_string()))?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn issue_guildcard_locked(conn: &Connection) -> Result<u32> {
            conn.execute("INSERT INTO guildcards (account_id) VALUES (NULL)", [])
                .map_err(|e| ProtoError::Database(e.to_string()))?;
            Ok(conn.last_insert_rowid() as u32)
        }
    }

    impl AccountStore for SqliteAccountStore {
        fn dc_v1_login(&self, dc_id: &str, serial: &str, access_key: &str) -> Result<DcAccount> {
            let conn = self.conn.lock().unwrap();
            let existing: Option<u32> = conn
                .query_row(
                    "SELECT guildcard FROM dreamcast_clients WHERE dc_id = ?1 \
                     AND serial_number = ?2 AND access_key = ?3",
                    params![dc_id, serial, access_key],
                    |row| row.get(0),
                )
                .ok();

            let guildcard = match existing {
                Some(gc) => gc,
                None => {
                    let gc = Self::issue_guildcard_locked(&conn)?;
                    conn.execute(
                        "INSERT INTO dreamcast_clients \
                         (guildcard, serial_number, access_key, dc_id) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![gc, serial, access_key, dc_id],
                    )
                    .map_err(|e| ProtoError::Database(e.to_string()))?;
                    gc
                }
            };

            Ok(DcAccount { guildcard })
        }

        fn dc_v2_or_pc_login(
            &self,
            is_pc: bool,
            dc_id: &str,
            serial: &str,
            access_key: &str,
        ) -> Result<DcAccount> {
            let conn = self.conn.lock().unwrap();

            let query = if !is_pc {
                "SELECT guildcard FROM dreamcast_clients WHERE dc_id = ?1 \
                 AND serial_number = ?2 AND access_key = ?3"
            } else {
                "SELECT guildcard FROM dreamcast_clients WHERE \
                 serial_number = ?2 AND access_key = ?3"
            };
            let existing: Option<u32> = conn
                .query_row(query, params![dc_id, serial, access_key], |row| row.get(0))
                .ok();

            if let Some(gc) = existing {
                return Ok(DcAccount { guildcard: gc });
            }

            if is_pc {
                // First-run migration: a PC client's serial number is
                // still the placeholder row created under access key
                // alone; claim it and fill in the real serial.
                let migrated: Option<u32> = conn
                    .query_row(
                        "SELECT guildcard FROM dreamcast_clients WHERE \
                         access_key = ?1 AND serial_number = '0'",
                        params![access_key],
                        |row| row.get(0),
                    )
                    .ok();

                return match migrated {
                    Some(gc) => {
                        conn.execute(
                            "UPDATE dreamcast_clients SET serial_number = ?1 \
                             WHERE guildcard = ?2",
                            params![serial, gc],
                        )
                        .map_err(|e| ProtoError::Database(e.to_string()))?;
                        Ok(DcAccount { guildcard: gc })
                    }
                    // Unregistered PC client; the original disconnects here.
                    None => Err(ProtoError::AuthFailure),
                };
            }

            let gc = Self::issue_guildcard_locked(&conn)?;
            conn.execute(
                "INSERT INTO dreamcast_clients \
                 (guildcard, serial_number, access_key, dc_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![gc, serial, access_key, dc_id],
            )
            .map_err(|e| ProtoError::Database(e.to_string()))?;
            Ok(DcAccount { guildcard: gc })
        }

        fn gc_login(&self, serial: &str, access_key: &str) -> Result<GcAccount> {
            let conn = self.conn.lock().unwrap();
            let guildcard: u32 = conn
                .query_row(
                    "SELECT guildcard FROM gamecube_clients WHERE \
                     serial_number = ?1 AND access_key = ?2",
                    params![serial, access_key],
                    |row| row.get(0),
                )
                .map_err(|_| ProtoError::AuthFailure)?;

            let account_id: u32 = conn
                .query_row(
                    "SELECT account_id FROM guildcards WHERE guildcard = ?1",
                    params![guildcard],
                    |row| row.get(0),
                )
                .map_err(|_| ProtoError::AuthFailure)?;

            Ok(GcAccount {
                guildcard,
                account_id,
            })
        }

        fn account_password_digest(&self, account_id: u32) -> Result<(String, String)> {
            let conn = self.conn.lock().unwrap();
            let (password, regtime): (String, String) = conn
                .query_row(
                    "SELECT password, regtime FROM account_data WHERE account_id = ?1",
                    params![account_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|_| ProtoError::AuthFailure)?;
            Ok((password, regtime))
        }

        fn issue_guildcard(&self) -> Result<u32> {
            let conn = self.conn.lock().unwrap();
            Self::issue_guildcard_locked(&conn)
        }

        fn gm_privilege(&self, guildcard: u32) -> Result<u8> {
            let conn = self.conn.lock().unwrap();
            let privilege: Option<u8> = conn
                .query_row(
                    "SELECT privilege FROM gm_accounts WHERE guildcard = ?1",
                    params![guildcard],
                    |row| row.get(0),
                )
                .ok();
            Ok(privilege.unwrap_or(0))
        }

        fn restore_character(&self, guildcard: u32, slot: u32) -> Result<Vec<u8>> {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT data FROM characters WHERE guildcard = ?1 AND slot = ?2",
                params![guildcard, slot],
                |row| row.get(0),
            )
            .map_err(|e| ProtoError::Database(e.to_string()))
        }
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::sqlite::SqliteAccountStore;
    use super::*;
    use rusqlite::params;

    fn store() -> SqliteAccountStore {
        let store = SqliteAccountStore::open(":memory:").unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE guildcards (guildcard INTEGER PRIMARY KEY, account_id INTEGER);
                 CREATE TABLE dreamcast_clients (
                     guildcard INTEGER, serial_number TEXT, access_key TEXT, dc_id TEXT
                 );
                 CREATE TABLE gamecube_clients (
                     guildcard INTEGER, serial_number TEXT, access_key TEXT
                 );
                 CREATE TABLE account_data (
                     account_id INTEGER, password TEXT, regtime TEXT
                 );
                 CREATE TABLE gm_accounts (guildcard INTEGER PRIMARY KEY, privilege INTEGER);
                 CREATE TABLE characters (guildcard INTEGER, slot INTEGER, data BLOB);",
            )
            .unwrap();
        }
        store
    }

    #[test]
    fn gm_privilege_defaults_to_zero_for_unknown_guildcard() {
        let store = store();
        assert_eq!(store.gm_privilege(999).unwrap(), 0);
    }

    #[test]
    fn gm_privilege_returns_the_stored_level() {
        let store = store();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO gm_accounts (guildcard, privilege) VALUES (?1, ?2)",
                params![42, 3],
            )
            .unwrap();
        }
        assert_eq!(store.gm_privilege(42).unwrap(), 3);
    }

    #[test]
    fn restore_character_round_trips_the_stored_blob() {
        let store = store();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO characters (guildcard, slot, data) VALUES (?1, ?2, ?3)",
                params![7, 0, vec![0xABu8; 1052]],
            )
            .unwrap();
        }
        let data = store.restore_character(7, 0).unwrap();
        assert_eq!(data.len(), 1052);
        assert!(data.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn dc_v1_first_contact_creates_a_guildcard() {
        let store = store();
        let account = store.dc_v1_login("dc1", "serial1", "access1").unwrap();
        assert!(account.guildcard > 0);

        let again = store.dc_v1_login("dc1", "serial1", "access1").unwrap();
        assert_eq!(again.guildcard, account.guildcard);
    }

    #[test]
    fn pc_migration_claims_placeholder_serial_row() {
        let store = store();
        let seeded = store.dc_v1_login("dc1", "0", "access1").unwrap();

        let migrated = store
            .dc_v2_or_pc_login(true, "dc1", "realserial", "access1")
            .unwrap();
        assert_eq!(migrated.guildcard, seeded.guildcard);

        let again = store
            .dc_v2_or_pc_login(true, "dc1", "realserial", "access1")
            .unwrap();
        assert_eq!(again.guildcard, seeded.guildcard);
    }

    #[test]
    fn pc_login_without_prior_registration_fails() {
        let store = store();
        let result = store.dc_v2_or_pc_login(true, "dc1", "serial1", "unknown");
        assert!(matches!(result, Err(ProtoError::AuthFailure)));
    }
}
