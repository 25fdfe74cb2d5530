use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;

use dragonfly_core::topic::TopicPattern;
use dragonfly_core::{DEFAULT_HOST, DEFAULT_PORT};

use crate::auth::Rights;

// The broker reads a line-oriented policy file. Blocks open with
// `# General` or `# User` and run until the first blank line. Within a
// block each line is `key value [value ...]`; `topic <pattern> <rights>`
// lines accumulate into the block's rights table. Slash-slash lines are
// comments, as are slash-star spans closed by a line ending in star-slash.

/// A parsed value atom: `true`/`false`, `null`, `0x`/`0o`/`0b` integers,
/// decimal integers, floats, everything else a string. Multiple values on a
/// line group into a list; `|` splits an atom into a sub-list.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
    List(Vec<Value>),
}

impl Value {
    pub fn parse(atom: &str) -> Value {
        if atom.contains('|') {
            return Value::List(atom.split('|').map(Value::parse).collect());
        }

        let lower = atom.to_lowercase();

        match lower.as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "null" => return Value::Null,
            _ => {}
        }

        for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
            if let Some(digits) = lower.strip_prefix(prefix) {
                if let Ok(n) = i64::from_str_radix(digits, radix) {
                    return Value::Int(n);
                }
            }
        }

        if let Ok(n) = atom.parse::<i64>() {
            return Value::Int(n);
        }

        if let Ok(x) = atom.parse::<f64>() {
            return Value::Float(x);
        }

        return Value::Str(atom.to_owned());
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => return Some(*b),
            _ => return None,
        }
    }

    /// Strings keep their text, numbers render back to text. Used for keys
    /// like `password 123456789` where the atom parses as an integer but
    /// the credential is its textual form.
    fn to_text(&self) -> Option<String> {
        match self {
            Value::Str(s) => return Some(s.clone()),
            Value::Int(n) => return Some(n.to_string()),
            Value::Float(x) => return Some(x.to_string()),
            Value::Bool(b) => return Some(b.to_string()),
            Value::Null | Value::List(_) => return None,
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    kind: ConfigErrorKind,
    message: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConfigErrorKind {
    Io,
    BadPattern,
    BadValue,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, message: String) -> Self {
        return Self { kind, message };
    }

    pub fn kind(&self) -> ConfigErrorKind {
        return self.kind;
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return write!(f, "{:?}: {}", self.kind, self.message);
    }
}

impl std::error::Error for ConfigError {}

/// One `topic <pattern> <rights>` rule.
#[derive(Clone, Debug)]
pub struct TopicRule {
    pattern: TopicPattern,
    rights: Rights,
}

impl TopicRule {
    pub fn pattern(&self) -> &TopicPattern {
        return &self.pattern;
    }

    pub fn rights(&self) -> &Rights {
        return &self.rights;
    }
}

#[derive(Clone, Debug, Default)]
pub struct UserRecord {
    username: String,
    password: Option<String>,
    topics: Vec<TopicRule>,
}

impl UserRecord {
    pub fn username(&self) -> &str {
        return &self.username;
    }

    pub fn password(&self) -> Option<&str> {
        return self.password.as_deref();
    }

    pub fn topics(&self) -> &[TopicRule] {
        return &self.topics;
    }
}

/// The authorization policy: loaded once at startup, immutable afterwards.
#[derive(Clone, Debug, Default)]
pub struct Policy {
    require_auth: bool,
    topics: Vec<TopicRule>,
    users: Vec<UserRecord>,
}

impl Policy {
    pub fn require_auth(&self) -> bool {
        return self.require_auth;
    }

    pub fn topics(&self) -> &[TopicRule] {
        return &self.topics;
    }

    pub fn users(&self) -> &[UserRecord] {
        return &self.users;
    }

    /// Resolves the user record for a presented username and password. A
    /// record without a password matches on username alone; a record with
    /// one requires an equal presented password.
    pub fn find_user(&self, username: Option<&str>, password: Option<&str>) -> Option<&UserRecord> {
        let username = username?;

        for user in self.users.iter() {
            if user.username == username {
                match &user.password {
                    None => return Some(user),
                    Some(required) => {
                        if password == Some(required.as_str()) {
                            return Some(user);
                        }
                    }
                }
            }
        }

        return None;
    }
}

pub struct BrokerConfig {
    host: String,
    port: u16,
    log_console: bool,
    log_file: bool,
    log_level: LevelFilter,
    policy: Policy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        return Self {
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            log_console: true,
            log_file: false,
            log_level: LevelFilter::Info,
            policy: Policy::default(),
        };
    }
}

impl BrokerConfig {
    pub fn addr(&self) -> String {
        return self.host.clone() + ":" + &self.port.to_string();
    }

    pub fn set_addr(&mut self, host: &str, port: u16) {
        self.host = String::from(host);
        self.port = port;
    }

    pub fn should_log_console(&self) -> bool {
        return self.log_console;
    }

    pub fn should_log_file(&self) -> bool {
        return self.log_file;
    }

    pub fn log_level(&self) -> LevelFilter {
        return self.log_level;
    }

    pub fn policy(&self) -> &Policy {
        return &self.policy;
    }

    pub fn into_policy(self) -> Policy {
        return self.policy;
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = BrokerConfig::default();

        let mut skipping = false;
        let mut block: Option<Block> = None;

        // a virtual blank line flushes a block still open at EOF
        for line in text.lines().chain([""]) {
            let lead = line.trim_start();

            if skipping {
                if line.trim_end().ends_with("*/") {
                    skipping = false;
                }
                continue;
            }

            if lead.starts_with("//") {
                continue;
            }

            if lead.starts_with("/*") {
                if !line.trim_end().ends_with("*/") {
                    skipping = true;
                }
                continue;
            }

            if block.is_none() {
                if let Some(kind) = line.strip_prefix("# ") {
                    block = Some(Block::new(kind.to_lowercase()));
                }
            } else if line.trim().is_empty() {
                let open = block.take().unwrap();
                open.fold_into(&mut config)?;
            } else {
                block.as_mut().unwrap().push_line(line);
            }
        }

        return Ok(config);
    }
}

impl TryFrom<&Path> for BrokerConfig {
    type Error = ConfigError;

    fn try_from(value: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(value).map_err(|err| {
            ConfigError::new(
                ConfigErrorKind::Io,
                format!("Could not read {}: {err}", value.display()),
            )
        })?;

        return Self::parse(&text);
    }
}

/// A block under construction: plain `key value` entries plus the
/// accumulated `topic` lines, both in declaration order.
struct Block {
    kind: String,
    entries: Vec<(String, Value)>,
    topics: Vec<(String, Value)>,
}

impl Block {
    fn new(kind: String) -> Self {
        return Self {
            kind,
            entries: vec![],
            topics: vec![],
        };
    }

    fn push_line(&mut self, line: &str) {
        let args: Vec<&str> = line.split_whitespace().collect();
        let key = args[0].to_lowercase();

        if args.len() == 2 {
            self.entries.push((key, Value::parse(args[1])));
        } else if args.len() > 2 {
            if key == "topic" {
                self.topics.push((args[1].to_owned(), Value::parse(args[2])));
            } else {
                let values = args[1..].iter().map(|arg| Value::parse(arg)).collect();
                self.entries.push((key, Value::List(values)));
            }
        }
    }

    fn rules(&self) -> Result<Vec<TopicRule>, ConfigError> {
        let mut rules = vec![];

        for (pattern, rights) in self.topics.iter() {
            let pattern = TopicPattern::compile(pattern).map_err(|err| {
                ConfigError::new(
                    ConfigErrorKind::BadPattern,
                    format!("Invalid topic pattern {pattern}: {err}"),
                )
            })?;

            rules.push(TopicRule {
                pattern,
                rights: Rights::from_value(rights),
            });
        }

        return Ok(rules);
    }

    fn fold_into(self, config: &mut BrokerConfig) -> Result<(), ConfigError> {
        match self.kind.as_str() {
            "general" => {
                config.policy.topics.extend(self.rules()?);

                for (key, value) in self.entries.iter() {
                    match key.as_str() {
                        "require_auth" => {
                            config.policy.require_auth = value.as_bool().ok_or_else(|| {
                                ConfigError::new(
                                    ConfigErrorKind::BadValue,
                                    format!("require_auth expects a boolean, found {value:?}"),
                                )
                            })?;
                        }
                        "host" => {
                            if let Some(host) = value.to_text() {
                                config.host = host;
                            }
                        }
                        "port" => match value {
                            Value::Int(port) if (0..=u16::MAX as i64).contains(port) => {
                                config.port = *port as u16;
                            }
                            _ => {
                                return Err(ConfigError::new(
                                    ConfigErrorKind::BadValue,
                                    format!("port expects an integer, found {value:?}"),
                                ));
                            }
                        },
                        "log_console" => {
                            if let Some(b) = value.as_bool() {
                                config.log_console = b;
                            }
                        }
                        "log_file" => {
                            if let Some(b) = value.as_bool() {
                                config.log_file = b;
                            }
                        }
                        "log_level" => {
                            if let Some(level) = value.to_text() {
                                match LevelFilter::from_str(&level) {
                                    Ok(level) => config.log_level = level,
                                    Err(_) => {
                                        log::warn!("Unknown log level {level}, keeping {}", config.log_level);
                                    }
                                }
                            }
                        }
                        _ => {
                            log::debug!("Ignoring unknown general key: {key}");
                        }
                    }
                }
            }

            "user" => {
                let mut user = UserRecord::default();
                user.topics = self.rules()?;

                for (key, value) in self.entries.iter() {
                    match key.as_str() {
                        "username" => {
                            if let Some(username) = value.to_text() {
                                user.username = username;
                            }
                        }
                        "password" => {
                            user.password = value.to_text();
                        }
                        _ => {
                            log::debug!("Ignoring unknown user key: {key}");
                        }
                    }
                }

                if user.username.is_empty() {
                    log::warn!("Ignoring user block without a username.");
                } else {
                    config.policy.users.push(user);
                }
            }

            kind => {
                log::warn!("Ignoring unknown block kind: {kind}");
            }
        }

        return Ok(());
    }
}
