//! Command Dispatcher
//!
//! Turns one decoded top-level frame into a command invocation against the
//! keyspace. The first element names the command (case-insensitive); it is
//! resolved through the static [`COMMANDS`] table and the matching handler
//! gets the remaining elements positionally. Every handler validates its
//! own arguments.
//!
//! ## Supported Commands
//!
//! ### Keys and strings
//! - `GET key`, `MGET key [key ...]`
//! - `SET key value [EX seconds | PX milliseconds] [NX | XX]`
//! - `SETEX key seconds value`, `PSETEX key milliseconds value`
//! - `MSET key value [key value ...]`, `MSETNX key value [key value ...]`
//! - `DEL key [key ...]`, `EXISTS key [key ...]`, `TYPE key`
//! - `KEYS pattern`, `SCAN cursor [COUNT n] [MATCH pattern]`
//!
//! ### Expiry
//! - `EXPIRE key seconds`, `PEXPIRE key milliseconds`, `EXPIREAT key unix-ms`
//! - `TTL key`, `PTTL key`
//!
//! ### Server and connection
//! - `PING [message]`, `ECHO message`, `INFO`, `SAVE`, `SELECT index`
//! - `DBSIZE`, `FLUSHDB`, `FLUSHALL`, `DUMPALL`
//! - `CLIENT SETNAME name`, `CLIENT GETNAME`, `QUIT`
//!
//! ## Outcomes
//!
//! ```text
//!  frame ──> execute() ──> lookup(name) ──> cmd_*(args)
//!                                              │
//!          ┌──────────────────┬────────────────┴───────┐
//!          ▼                  ▼                        ▼
//!   Outcome::Reply     Outcome::Transcript       Outcome::Close
//!   (one reply)        (DUMPALL: many replies)   (QUIT)
//! ```

use crate::persistence::SaveTrigger;
use crate::protocol::RespValue;
use crate::storage::{now_millis, Entry, GlobPattern, SharedKeyspace};
use bytes::Bytes;
use tracing::{debug, info};

/// Default page size for `SCAN`.
pub const DEFAULT_SCAN_COUNT: usize = 10;

/// What executing one command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A single reply.
    Reply(RespValue),
    /// A sequence of replies that together form a replayable command stream.
    Transcript(Vec<RespValue>),
    /// Close both directions of the stream without replying.
    Close,
}

impl From<RespValue> for Outcome {
    fn from(value: RespValue) -> Self {
        Outcome::Reply(value)
    }
}

/// Signature shared by every command handler.
pub type CommandFn = fn(&mut CommandHandler, &[RespValue]) -> Outcome;

/// Uppercase command name → handler.
pub const COMMANDS: &[(&str, CommandFn)] = &[
    ("PING", CommandHandler::cmd_ping),
    ("ECHO", CommandHandler::cmd_echo),
    ("INFO", CommandHandler::cmd_info),
    ("SAVE", CommandHandler::cmd_save),
    ("SELECT", CommandHandler::cmd_select),
    ("FLUSHALL", CommandHandler::cmd_flush),
    ("FLUSHDB", CommandHandler::cmd_flush),
    ("DBSIZE", CommandHandler::cmd_dbsize),
    ("CLIENT", CommandHandler::cmd_client),
    ("EXISTS", CommandHandler::cmd_exists),
    ("TYPE", CommandHandler::cmd_type),
    ("GET", CommandHandler::cmd_get),
    ("MGET", CommandHandler::cmd_mget),
    ("SET", CommandHandler::cmd_set),
    ("SETEX", CommandHandler::cmd_setex),
    ("PSETEX", CommandHandler::cmd_psetex),
    ("MSET", CommandHandler::cmd_mset),
    ("MSETNX", CommandHandler::cmd_msetnx),
    ("DEL", CommandHandler::cmd_del),
    ("KEYS", CommandHandler::cmd_keys),
    ("SCAN", CommandHandler::cmd_scan),
    ("EXPIRE", CommandHandler::cmd_expire),
    ("PEXPIRE", CommandHandler::cmd_pexpire),
    ("EXPIREAT", CommandHandler::cmd_expireat),
    ("TTL", CommandHandler::cmd_ttl),
    ("PTTL", CommandHandler::cmd_pttl),
    ("DUMPALL", CommandHandler::cmd_dumpall),
    ("QUIT", CommandHandler::cmd_quit),
];

/// Resolves an uppercase command name.
pub fn lookup(name: &str) -> Option<CommandFn> {
    COMMANDS
        .iter()
        .find(|(cmd, _)| *cmd == name)
        .map(|(_, handler)| *handler)
}

/// `SET` existence condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    IfAbsent,
    IfPresent,
}

/// Per-connection dispatcher bound to the shared keyspace.
pub struct CommandHandler {
    keyspace: SharedKeyspace,
    /// Connection name used in log lines; changed by `CLIENT SETNAME`.
    name: String,
    save_trigger: Option<SaveTrigger>,
}

impl CommandHandler {
    pub fn new(keyspace: SharedKeyspace, name: impl Into<String>) -> Self {
        Self {
            keyspace,
            name: name.into(),
            save_trigger: None,
        }
    }

    /// Lets `SAVE` request a snapshot write.
    pub fn with_save_trigger(mut self, trigger: SaveTrigger) -> Self {
        self.save_trigger = Some(trigger);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Executes one top-level frame.
    ///
    /// A scalar frame is treated as a one-element command line.
    pub fn execute(&mut self, frame: RespValue) -> Outcome {
        let args = match frame {
            RespValue::Array(args) => args,
            scalar => vec![scalar],
        };

        let Some(first) = args.first() else {
            return RespValue::error("ERR empty command").into();
        };
        let name = match first.to_bytes() {
            Some(name) => String::from_utf8_lossy(&name).into_owned(),
            None => return RespValue::error("ERR invalid command name").into(),
        };

        match lookup(&name.to_ascii_uppercase()) {
            Some(handler) => {
                debug!(client = %self.name, command = %name, argc = args.len() - 1, "Executing command");
                handler(self, &args[1..])
            }
            None => {
                debug!(client = %self.name, command = %name, "Unknown command");
                RespValue::error(format!("UNKNOWN COMMAND {}", name)).into()
            }
        }
    }

    // ========================================================================
    // Server and connection commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&mut self, args: &[RespValue]) -> Outcome {
        match args {
            [] => RespValue::pong().into(),
            [message] => echo(message),
            _ => wrong_args("ping"),
        }
    }

    /// ECHO message
    fn cmd_echo(&mut self, args: &[RespValue]) -> Outcome {
        match args {
            [message] => echo(message),
            _ => wrong_args("echo"),
        }
    }

    /// INFO [section]
    fn cmd_info(&mut self, _args: &[RespValue]) -> Outcome {
        RespValue::ok().into()
    }

    /// SAVE
    fn cmd_save(&mut self, _args: &[RespValue]) -> Outcome {
        if let Some(trigger) = &self.save_trigger {
            info!(client = %self.name, "Snapshot requested");
            trigger.request();
        }
        RespValue::ok().into()
    }

    /// SELECT index
    fn cmd_select(&mut self, args: &[RespValue]) -> Outcome {
        match args {
            [index] if index.to_integer() == Some(0) => RespValue::ok().into(),
            [_] => RespValue::error("SELECT can only select db index 0").into(),
            _ => wrong_args("select"),
        }
    }

    /// FLUSHDB / FLUSHALL
    fn cmd_flush(&mut self, _args: &[RespValue]) -> Outcome {
        self.keyspace.borrow_mut().clear();
        RespValue::ok().into()
    }

    /// DBSIZE
    fn cmd_dbsize(&mut self, _args: &[RespValue]) -> Outcome {
        RespValue::integer(self.keyspace.borrow().len() as i64).into()
    }

    /// CLIENT SETNAME name | CLIENT GETNAME
    fn cmd_client(&mut self, args: &[RespValue]) -> Outcome {
        let Some(sub) = args.first() else {
            return wrong_args("client");
        };
        let sub = sub.as_str().unwrap_or_default().to_ascii_uppercase();

        match (sub.as_str(), &args[1..]) {
            ("SETNAME", [name]) => match name.to_bytes() {
                Some(name) => {
                    let name = String::from_utf8_lossy(&name).into_owned();
                    info!(client = %self.name, new_name = %name, "Client renamed");
                    self.name = name;
                    RespValue::ok().into()
                }
                None => invalid("name"),
            },
            ("SETNAME", _) => wrong_args("client|setname"),
            ("GETNAME", []) => RespValue::bulk_string(Bytes::from(self.name.clone())).into(),
            ("GETNAME", _) => wrong_args("client|getname"),
            (other, _) => RespValue::error(format!("ERR unknown CLIENT subcommand '{}'", other)).into(),
        }
    }

    /// QUIT
    fn cmd_quit(&mut self, _args: &[RespValue]) -> Outcome {
        debug!(client = %self.name, "Client requested QUIT");
        Outcome::Close
    }

    // ========================================================================
    // Key and string commands
    // ========================================================================

    /// EXISTS key [key ...]
    fn cmd_exists(&mut self, args: &[RespValue]) -> Outcome {
        if args.is_empty() {
            return wrong_args("exists");
        }
        let keyspace = self.keyspace.borrow();
        let count = args
            .iter()
            .filter_map(RespValue::to_bytes)
            .filter(|key| keyspace.contains(key))
            .count();
        RespValue::integer(count as i64).into()
    }

    /// TYPE key
    fn cmd_type(&mut self, args: &[RespValue]) -> Outcome {
        let [key] = args else {
            return wrong_args("type");
        };
        let Some(key) = key.to_bytes() else {
            return invalid("key");
        };
        let kind = if self.keyspace.borrow().contains(&key) {
            "string"
        } else {
            ""
        };
        RespValue::simple_string(kind).into()
    }

    /// GET key
    ///
    /// Expiry is not consulted: an expired key stays readable until the
    /// reaper removes it.
    fn cmd_get(&mut self, args: &[RespValue]) -> Outcome {
        let [key] = args else {
            return wrong_args("get");
        };
        let Some(key) = key.to_bytes() else {
            return invalid("key");
        };
        self.value_of(&key).into()
    }

    /// MGET key [key ...]
    fn cmd_mget(&mut self, args: &[RespValue]) -> Outcome {
        if args.is_empty() {
            return wrong_args("mget");
        }
        let values = args
            .iter()
            .map(|arg| match arg.to_bytes() {
                Some(key) => self.value_of(&key),
                None => RespValue::null(),
            })
            .collect();
        RespValue::array(values).into()
    }

    fn value_of(&self, key: &[u8]) -> RespValue {
        match self.keyspace.borrow().get(key) {
            Some(entry) => RespValue::bulk_string(entry.value.clone()),
            None => RespValue::null(),
        }
    }

    /// SET key value [EX seconds | PX milliseconds] [NX | XX]
    fn cmd_set(&mut self, args: &[RespValue]) -> Outcome {
        match args {
            [key, value, options @ ..] => self.apply_set(key, value, options),
            _ => wrong_args("set"),
        }
    }

    /// SETEX key seconds value
    fn cmd_setex(&mut self, args: &[RespValue]) -> Outcome {
        match args {
            [key, seconds, value] => {
                let options = [RespValue::bulk_string(Bytes::from_static(b"EX")), seconds.clone()];
                self.apply_set(key, value, &options)
            }
            _ => wrong_args("setex"),
        }
    }

    /// PSETEX key milliseconds value
    fn cmd_psetex(&mut self, args: &[RespValue]) -> Outcome {
        match args {
            [key, millis, value] => {
                let options = [RespValue::bulk_string(Bytes::from_static(b"PX")), millis.clone()];
                self.apply_set(key, value, &options)
            }
            _ => wrong_args("psetex"),
        }
    }

    /// Shared body of `SET`, `SETEX` and `PSETEX`.
    fn apply_set(&mut self, key: &RespValue, value: &RespValue, options: &[RespValue]) -> Outcome {
        let Some(key) = key.to_bytes() else {
            return invalid("key");
        };
        let Some(value) = value.to_bytes() else {
            return invalid("value");
        };

        let now = now_millis();
        let mut expire_at: Option<u64> = None;
        let mut condition: Option<Condition> = None;

        let mut i = 0;
        while i < options.len() {
            let opt = options[i].as_str().unwrap_or_default().to_ascii_uppercase();
            match opt.as_str() {
                "EX" | "PX" if expire_at.is_none() => {
                    i += 1;
                    let Some(operand) = options.get(i) else {
                        return syntax_error();
                    };
                    let amount = match operand.to_integer() {
                        Some(n) if n > 0 => n,
                        Some(_) => return RespValue::error("ERR invalid expire time in 'set' command").into(),
                        None => return not_an_integer(),
                    };
                    let millis = if opt == "EX" {
                        amount.saturating_mul(1000)
                    } else {
                        amount
                    };
                    expire_at = Some(offset_from(now, millis));
                }
                "NX" if condition.is_none() => condition = Some(Condition::IfAbsent),
                "XX" if condition.is_none() => condition = Some(Condition::IfPresent),
                _ => return syntax_error(),
            }
            i += 1;
        }

        let mut keyspace = self.keyspace.borrow_mut();
        let exists = keyspace.contains(&key);
        match condition {
            Some(Condition::IfAbsent) if exists => return RespValue::null().into(),
            Some(Condition::IfPresent) if !exists => return RespValue::null().into(),
            _ => {}
        }

        keyspace.set(key, Entry { value, expire_at });
        RespValue::ok().into()
    }

    /// MSET key value [key value ...]
    fn cmd_mset(&mut self, args: &[RespValue]) -> Outcome {
        let pairs = match key_value_pairs(args) {
            Ok(pairs) => pairs,
            Err(_) => return wrong_args("mset"),
        };
        let mut keyspace = self.keyspace.borrow_mut();
        for (key, value) in pairs {
            keyspace.set(key, Entry::new(value));
        }
        RespValue::ok().into()
    }

    /// MSETNX key value [key value ...]
    ///
    /// All or nothing: every key is checked before any is written.
    fn cmd_msetnx(&mut self, args: &[RespValue]) -> Outcome {
        let pairs = match key_value_pairs(args) {
            Ok(pairs) => pairs,
            Err(_) => return wrong_args("msetnx"),
        };
        let mut keyspace = self.keyspace.borrow_mut();
        if pairs.iter().any(|(key, _)| keyspace.contains(key)) {
            return RespValue::integer(0).into();
        }
        for (key, value) in pairs {
            keyspace.set(key, Entry::new(value));
        }
        RespValue::integer(1).into()
    }

    /// DEL key [key ...]
    fn cmd_del(&mut self, args: &[RespValue]) -> Outcome {
        if args.is_empty() {
            return wrong_args("del");
        }
        let mut keyspace = self.keyspace.borrow_mut();
        let removed = args
            .iter()
            .filter_map(RespValue::to_bytes)
            .filter(|key| keyspace.remove(key))
            .count();
        RespValue::integer(removed as i64).into()
    }

    /// KEYS pattern
    fn cmd_keys(&mut self, args: &[RespValue]) -> Outcome {
        let [pattern] = args else {
            return wrong_args("keys");
        };
        let Some(pattern) = pattern.to_bytes() else {
            return invalid("pattern");
        };
        let pattern = GlobPattern::new(&String::from_utf8_lossy(&pattern));
        let keys = self.keyspace.borrow().keys(Some(&pattern));
        RespValue::array(keys.into_iter().map(RespValue::bulk_string).collect()).into()
    }

    /// SCAN cursor [COUNT n] [MATCH pattern]
    ///
    /// The cursor is an offset into the filtered key list; `0` in the reply
    /// means the iteration is complete.
    fn cmd_scan(&mut self, args: &[RespValue]) -> Outcome {
        let Some((cursor, options)) = args.split_first() else {
            return wrong_args("scan");
        };
        let cursor = match cursor.to_integer() {
            Some(c) if c >= 0 => c as usize,
            _ => return RespValue::error("ERR invalid cursor").into(),
        };

        let mut count = DEFAULT_SCAN_COUNT;
        let mut pattern: Option<GlobPattern> = None;

        let mut i = 0;
        while i < options.len() {
            let opt = options[i].as_str().unwrap_or_default().to_ascii_uppercase();
            let Some(operand) = options.get(i + 1) else {
                return syntax_error();
            };
            match opt.as_str() {
                "COUNT" => match operand.to_integer() {
                    Some(n) if n > 0 => count = n as usize,
                    Some(_) => return syntax_error(),
                    None => return not_an_integer(),
                },
                "MATCH" => match operand.to_bytes() {
                    Some(p) => pattern = Some(GlobPattern::new(&String::from_utf8_lossy(&p))),
                    None => return invalid("pattern"),
                },
                _ => return syntax_error(),
            }
            i += 2;
        }

        let keys = self.keyspace.borrow().keys(pattern.as_ref());
        let start = cursor.min(keys.len());
        let end = start.saturating_add(count).min(keys.len());
        let next = if end < keys.len() { end } else { 0 };

        let page = keys[start..end]
            .iter()
            .cloned()
            .map(RespValue::bulk_string)
            .collect();
        RespValue::array(vec![
            RespValue::bulk_string(Bytes::from(next.to_string())),
            RespValue::array(page),
        ])
        .into()
    }

    // ========================================================================
    // Expiry commands
    // ========================================================================

    /// EXPIRE key seconds
    fn cmd_expire(&mut self, args: &[RespValue]) -> Outcome {
        self.apply_expiry("expire", args, |now, n| offset_from(now, n.saturating_mul(1000)))
    }

    /// PEXPIRE key milliseconds
    fn cmd_pexpire(&mut self, args: &[RespValue]) -> Outcome {
        self.apply_expiry("pexpire", args, offset_from)
    }

    /// EXPIREAT key unix-time-milliseconds
    fn cmd_expireat(&mut self, args: &[RespValue]) -> Outcome {
        self.apply_expiry("expireat", args, |_, at| at.max(0) as u64)
    }

    /// Sets an absolute expiry computed from the integer argument.
    /// A missing key replies 0 and leaves the keyspace untouched.
    fn apply_expiry<F>(&mut self, cmd: &str, args: &[RespValue], expire_at: F) -> Outcome
    where
        F: FnOnce(u64, i64) -> u64,
    {
        let [key, amount] = args else {
            return wrong_args(cmd);
        };
        let Some(key) = key.to_bytes() else {
            return invalid("key");
        };
        let Some(amount) = amount.to_integer() else {
            return not_an_integer();
        };

        let mut keyspace = self.keyspace.borrow_mut();
        if !keyspace.contains(&key) {
            return RespValue::integer(0).into();
        }
        let at = expire_at(now_millis(), amount);
        RespValue::integer(keyspace.set_expiry(&key, at) as i64).into()
    }

    /// TTL key
    fn cmd_ttl(&mut self, args: &[RespValue]) -> Outcome {
        self.remaining("ttl", args, |ms| ((ms + 500) / 1000) as i64)
    }

    /// PTTL key
    fn cmd_pttl(&mut self, args: &[RespValue]) -> Outcome {
        self.remaining("pttl", args, |ms| ms as i64)
    }

    /// -2 for a missing key, -1 for no expiry, else `scale(remaining ms)`.
    fn remaining<F>(&mut self, cmd: &str, args: &[RespValue], scale: F) -> Outcome
    where
        F: FnOnce(u64) -> i64,
    {
        let [key] = args else {
            return wrong_args(cmd);
        };
        let Some(key) = key.to_bytes() else {
            return invalid("key");
        };

        let reply = match self.keyspace.borrow().get(&key) {
            None => -2,
            Some(entry) => match entry.remaining_ms(now_millis()) {
                None => -1,
                Some(ms) => scale(ms),
            },
        };
        RespValue::integer(reply).into()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// DUMPALL
    ///
    /// Emits `FLUSHDB` followed by one `SET` per live key, with `PX` carrying
    /// the remaining lifetime. Keys whose expiry has already passed are left
    /// out. Replaying the output rebuilds the keyspace.
    fn cmd_dumpall(&mut self, _args: &[RespValue]) -> Outcome {
        let now = now_millis();
        let keyspace = self.keyspace.borrow();

        let mut transcript = Vec::with_capacity(keyspace.len() + 1);
        transcript.push(RespValue::command([Bytes::from_static(b"FLUSHDB")]));

        for (key, entry) in keyspace.iter() {
            let mut line = vec![Bytes::from_static(b"SET"), key.clone(), entry.value.clone()];
            match entry.expire_at {
                None => {}
                Some(at) if at > now => {
                    line.push(Bytes::from_static(b"PX"));
                    line.push(Bytes::from((at - now).to_string()));
                }
                Some(_) => continue,
            }
            transcript.push(RespValue::command(line));
        }

        debug!(client = %self.name, keys = transcript.len() - 1, "Dumped keyspace");
        Outcome::Transcript(transcript)
    }
}

/// `now + delta_ms`, clamped to the representable range.
fn offset_from(now: u64, delta_ms: i64) -> u64 {
    now.saturating_add_signed(delta_ms)
}

fn echo(message: &RespValue) -> Outcome {
    match message.to_bytes() {
        Some(bytes) => RespValue::bulk_string(bytes).into(),
        None => message.clone().into(),
    }
}

fn key_value_pairs(args: &[RespValue]) -> Result<Vec<(Bytes, Bytes)>, ()> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(());
    }
    args.chunks_exact(2)
        .map(|pair| match (pair[0].to_bytes(), pair[1].to_bytes()) {
            (Some(key), Some(value)) => Ok((key, value)),
            _ => Err(()),
        })
        .collect()
}

fn wrong_args(cmd: &str) -> Outcome {
    RespValue::error(format!("ERR wrong number of arguments for '{}' command", cmd)).into()
}

fn invalid(what: &str) -> Outcome {
    RespValue::error(format!("ERR invalid {}", what)).into()
}

fn syntax_error() -> Outcome {
    RespValue::error("ERR syntax error").into()
}

fn not_an_integer() -> Outcome {
    RespValue::error("ERR value is not an integer or out of range").into()
}
