//! Lua plugin loader.
//!
//! Every `*.lua` file in the plugin directory gets its own VM and must define a global
//! `plugin` table:
//!
//! ```lua
//! plugin = {
//!   name = "Ping",
//!   description = "Connectivity checks",
//!   commands = {
//!     {
//!       command = { "/ping", "/p" },
//!       description = "Replies pong",
//!       channel = true,
//!       func = function(message)
//!         message:reply("pong " .. message.from.short_name)
//!       end,
//!     },
//!   },
//! }
//! ```
//!
//! # Globals available to plugins
//!
//! - `bot.CATCH_ALL_EVENTS`, `bot.CATCH_ALL_TEXT` - catch-all values for `command`
//! - `bot.MAX_TEXT_LEN` - longest text, in bytes, a reply may carry
//! - `bot.memory.read(key)` / `bot.memory.write(key, value)` - store shared by all plugins
//! - `bot.help()` - the bot's help text
//! - `bot.time_ago(seconds)` - age of an epoch timestamp, e.g. "5 minutes"
//! - `log.info/debug/warn/error(msg)` - routed to the `plugin` log target
//!
//! Handlers receive a `message` userdata and return the next conversation state: `nil`
//! for `MAIN` or a state name. Besides `reply` and `reply_blocking`, the message gives
//! read-only access to the receiving session's node table: `message:nodes()` lists known
//! nodes in display order and `message:find_node(text)` resolves a short name or node id.

use crate::bot::plugin::{Command, CommandHandler, Plugin, PluginError, PluginLoader, State, Trigger};
use crate::meshtastic::message::{Message, Payload, DEFAULT_REPLY_TIMEOUT};
use crate::meshtastic::node::{time_ago, NodeHandle};
use crate::meshtastic::session::MAX_TEXT_LEN;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, info, warn};
use mlua::{
    Function, Lua, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib, Table, UserData, UserDataFields,
    UserDataMethods, Value,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub const CATCH_ALL_EVENTS: i64 = 1;
pub const CATCH_ALL_TEXT: i64 = 2;

/// Key/value store behind `bot.memory`.
pub type Memory = Arc<Mutex<HashMap<String, serde_json::Value>>>;

pub type HelpFn = Arc<dyn Fn() -> String + Send + Sync>;

pub struct LuaPluginLoader {
    dir: PathBuf,
    memory: Memory,
    help: Arc<RwLock<Option<HelpFn>>>,
    reply_timeout: Duration,
}

impl LuaPluginLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memory: Arc::new(Mutex::new(HashMap::new())),
            help: Arc::new(RwLock::new(None)),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Wait used by `reply_blocking` when the plugin passes no timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Set what `bot.help()` returns, for plugins already loaded and future ones.
    pub fn bind_help<F>(&self, help: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        *self.help.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(help));
    }

    /// Build a plugin from Lua source. `name` is used in errors and log lines.
    pub fn load_source(&self, name: &str, source: &str) -> Result<Plugin, PluginError> {
        let lua = self.new_vm(name).map_err(load_error(name))?;
        lua.load(source)
            .set_name(name)
            .exec()
            .map_err(load_error(name))?;
        let definition = match lua.globals().get::<Value>("plugin").map_err(load_error(name))? {
            Value::Table(t) => t,
            _ => {
                return Err(PluginError::Load(format!(
                    "{}: no plugin definition found",
                    name
                )))
            }
        };
        parse_plugin(&lua, name, &definition, self.reply_timeout)
    }

    fn new_vm(&self, name: &str) -> mlua::Result<Lua> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            LuaOptions::new(),
        )?;
        register_bot(&lua, self.memory.clone(), self.help.clone())?;
        register_log(&lua, name)?;
        Ok(lua)
    }
}

#[async_trait]
impl PluginLoader for LuaPluginLoader {
    async fn load(&self) -> Result<Vec<Plugin>, PluginError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("lua") && path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        let mut plugins = Vec::with_capacity(files.len());
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = tokio::fs::read_to_string(&path).await?;
            let plugin = self.load_source(&name, &source)?;
            debug!(
                "Loaded plugin {} v{} from {} ({} commands)",
                plugin.name,
                plugin.version,
                name,
                plugin.commands.len()
            );
            plugins.push(plugin);
        }
        Ok(plugins)
    }
}

fn load_error(name: &str) -> impl Fn(mlua::Error) -> PluginError + '_ {
    move |e| PluginError::Load(format!("{}: {}", name, e))
}

fn lua_values() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

fn register_bot(lua: &Lua, memory: Memory, help: Arc<RwLock<Option<HelpFn>>>) -> mlua::Result<()> {
    let bot = lua.create_table()?;
    bot.set("CATCH_ALL_EVENTS", CATCH_ALL_EVENTS)?;
    bot.set("CATCH_ALL_TEXT", CATCH_ALL_TEXT)?;
    bot.set("MAX_TEXT_LEN", MAX_TEXT_LEN)?;

    let store = lua.create_table()?;
    let mem = memory.clone();
    store.set(
        "read",
        lua.create_function(move |lua, key: String| {
            let value = mem.lock().unwrap_or_else(|p| p.into_inner()).get(&key).cloned();
            match value {
                Some(v) => lua.to_value_with(&v, lua_values()),
                None => Ok(Value::Nil),
            }
        })?,
    )?;
    store.set(
        "write",
        lua.create_function(move |lua, (key, value): (String, Value)| {
            let mut mem = memory.lock().unwrap_or_else(|p| p.into_inner());
            if value.is_nil() {
                mem.remove(&key);
            } else {
                mem.insert(key, lua.from_value(value)?);
            }
            Ok(())
        })?,
    )?;
    bot.set("memory", store)?;

    bot.set(
        "time_ago",
        lua.create_function(|_, secs: i64| {
            Ok(Utc.timestamp_opt(secs, 0).single().map(time_ago))
        })?,
    )?;

    bot.set(
        "help",
        lua.create_function(move |_, ()| {
            let help = help.read().unwrap_or_else(|p| p.into_inner()).clone();
            Ok(help.map(|f| f()).unwrap_or_default())
        })?,
    )?;

    lua.globals().set("bot", bot)
}

fn register_log(lua: &Lua, plugin: &str) -> mlua::Result<()> {
    let table = lua.create_table()?;
    for level in [log::Level::Error, log::Level::Warn, log::Level::Info, log::Level::Debug] {
        let plugin = plugin.to_string();
        let f = lua.create_function(move |_, msg: String| {
            log::log!(target: "plugin", level, "[{}] {}", plugin, msg);
            Ok(())
        })?;
        table.set(level.as_str().to_lowercase(), f)?;
    }
    lua.globals().set("log", table)
}

fn parse_plugin(
    lua: &Lua,
    file: &str,
    def: &Table,
    reply_timeout: Duration,
) -> Result<Plugin, PluginError> {
    let err = load_error(file);
    let mut plugin = Plugin {
        name: def.get::<Option<String>>("name").map_err(&err)?.unwrap_or_default(),
        description: def
            .get::<Option<String>>("description")
            .map_err(&err)?
            .unwrap_or_default(),
        version: def.get::<Option<String>>("version").map_err(&err)?.unwrap_or_default(),
        hidden: def.get::<bool>("hidden").map_err(&err)?,
        ..Default::default()
    };
    if let Some(states) = def.get::<Option<Table>>("states").map_err(&err)? {
        for state in states.sequence_values::<String>() {
            plugin.states.push(State::new(state.map_err(&err)?));
        }
    }
    if let Some(commands) = def.get::<Option<Table>>("commands").map_err(&err)? {
        for (i, command) in commands.sequence_values::<Table>().enumerate() {
            let command = command.map_err(&err)?;
            plugin
                .commands
                .push(parse_command(lua, file, &plugin.name, i + 1, &command, reply_timeout)?);
        }
    }
    Ok(plugin)
}

fn parse_command(
    lua: &Lua,
    file: &str,
    plugin: &str,
    index: usize,
    def: &Table,
    reply_timeout: Duration,
) -> Result<Command, PluginError> {
    let err = |e: mlua::Error| PluginError::Load(format!("{}: command {}: {}", file, index, e));
    let invalid = |what: &str| PluginError::Load(format!("{}: command {}: {}", file, index, what));

    let mut triggers = Vec::new();
    match def.get::<Value>("command").map_err(err)? {
        Value::Nil => {}
        Value::String(s) => triggers.push(Trigger::Literal(s.to_string_lossy().to_string())),
        Value::Table(t) => {
            for s in t.sequence_values::<String>() {
                triggers.push(Trigger::Literal(s.map_err(err)?));
            }
        }
        Value::Integer(CATCH_ALL_EVENTS) => triggers.push(Trigger::CatchAllEvents),
        Value::Integer(CATCH_ALL_TEXT) => triggers.push(Trigger::CatchAllText),
        Value::Number(n) if n == CATCH_ALL_EVENTS as f64 => triggers.push(Trigger::CatchAllEvents),
        Value::Number(n) if n == CATCH_ALL_TEXT as f64 => triggers.push(Trigger::CatchAllText),
        other => return Err(invalid(&format!("unsupported `command` value of type {}", other.type_name()))),
    }
    match def.get::<Value>("prefix").map_err(err)? {
        Value::Nil => {}
        Value::String(s) => triggers.push(Trigger::Prefix(s.to_string_lossy().to_string())),
        Value::Table(t) => {
            for s in t.sequence_values::<String>() {
                triggers.push(Trigger::Prefix(s.map_err(err)?));
            }
        }
        other => return Err(invalid(&format!("unsupported `prefix` value of type {}", other.type_name()))),
    }

    let func = match def.get::<Value>("func").map_err(err)? {
        Value::Function(f) => f,
        Value::Nil => return Err(invalid("missing `func`")),
        other => return Err(invalid(&format!("`func` must be a function, got {}", other.type_name()))),
    };

    let handler = Arc::new(LuaCommandHandler {
        lua: lua.clone(),
        func,
        plugin: if plugin.is_empty() { file.to_string() } else { plugin.to_string() },
        reply_timeout,
    });
    Ok(Command {
        state: def
            .get::<Option<String>>("state")
            .map_err(err)?
            .map(State::new)
            .unwrap_or_default(),
        triggers,
        description: def
            .get::<Option<String>>("description")
            .map_err(err)?
            .unwrap_or_default(),
        private: def.get::<Option<bool>>("private").map_err(err)?.unwrap_or(true),
        channel: def.get::<bool>("channel").map_err(err)?,
        hidden: def.get::<bool>("hidden").map_err(err)?,
        handler,
    })
}

struct LuaCommandHandler {
    lua: Lua,
    func: Function,
    plugin: String,
    reply_timeout: Duration,
}

#[async_trait]
impl CommandHandler for LuaCommandHandler {
    async fn handle(&self, message: &Message) -> Result<State, PluginError> {
        let fail = |e: mlua::Error| PluginError::Handler(format!("{}: {}", self.plugin, e));
        let arg = self
            .lua
            .create_userdata(LuaMessage {
                message: message.clone(),
                reply_timeout: self.reply_timeout,
            })
            .map_err(fail)?;
        let ret: Value = self.func.call_async(arg).await.map_err(fail)?;
        match ret {
            Value::Nil => Ok(State::main()),
            Value::String(s) => Ok(State::new(s.to_string_lossy().to_string())),
            other => Err(PluginError::Handler(format!(
                "{}: handler returned a {}, expected a state name or nil",
                self.plugin,
                other.type_name()
            ))),
        }
    }
}

/// The `message` userdata handed to Lua handlers.
struct LuaMessage {
    message: Message,
    reply_timeout: Duration,
}

fn node_table(lua: &Lua, handle: &NodeHandle) -> mlua::Result<Table> {
    let node = handle.read();
    let t = lua.create_table()?;
    t.set("id", node.id)?;
    t.set("short_name", node.short_name.as_str())?;
    t.set("long_name", node.long_name.as_str())?;
    t.set("hops_away", node.hops_away)?;
    t.set("snr", node.snr)?;
    t.set("is_local", node.connected)?;
    t.set("last_heard", node.last_heard.map(|at| at.timestamp()))?;
    t.set("display", node.to_string())?;
    Ok(t)
}

impl UserData for LuaMessage {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("text", |_, this| Ok(this.message.text().map(str::to_string)));
        fields.add_field_method_get("type", |_, this| Ok(this.message.message_type().as_str()));
        fields.add_field_method_get("from", |lua, this| node_table(lua, &this.message.from));
        fields.add_field_method_get("to", |lua, this| node_table(lua, &this.message.to));
        fields.add_field_method_get("snr", |_, this| Ok(this.message.snr));
        fields.add_field_method_get("hops_away", |_, this| Ok(this.message.hops_away));
        fields.add_field_method_get("private", |_, this| Ok(this.message.is_private()));
        fields.add_field_method_get("channel", |_, this| Ok(this.message.channel));
        fields.add_field_method_get("id", |_, this| Ok(this.message.packet_id));
        fields.add_field_method_get("timestamp", |_, this| Ok(this.message.timestamp.timestamp()));
        fields.add_field_method_get("position", |lua, this| match &this.message.payload {
            Payload::Position(p) => lua.to_value_with(p, lua_values()),
            _ => Ok(Value::Nil),
        });
        fields.add_field_method_get("device_metrics", |lua, this| match &this.message.payload {
            Payload::DeviceTelemetry(m) => lua.to_value_with(m, lua_values()),
            _ => Ok(Value::Nil),
        });
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("nodes", |lua, this, ()| {
            let nodes = this.message.node_list().map_err(mlua::Error::external)?;
            let list = lua.create_table()?;
            for handle in nodes.sorted() {
                list.push(node_table(lua, &handle)?)?;
            }
            Ok(list)
        });
        methods.add_method("find_node", |lua, this, needle: String| {
            let nodes = this.message.node_list().map_err(mlua::Error::external)?;
            nodes.find(&needle).map(|h| node_table(lua, &h)).transpose()
        });
        methods.add_async_method("reply", |_, this, text: String| {
            let message = this.message.clone();
            async move { message.reply(&text).await.map_err(mlua::Error::external) }
        });
        for name in ["reply_blocking", "replyBlocking"] {
            methods.add_async_method(name, |_, this, (text, secs): (String, Option<f64>)| {
                let message = this.message.clone();
                let timeout = secs
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .map(Duration::from_secs_f64)
                    .unwrap_or(this.reply_timeout);
                async move {
                    let status = message
                        .reply_blocking(&text, timeout)
                        .await
                        .map_err(mlua::Error::external)?;
                    if status.is_delivered() {
                        info!("Reply to {} delivered", message.from);
                    } else {
                        warn!("Reply to {} {}", message.from, status);
                    }
                    Ok(status.is_delivered())
                }
            });
        }
    }
}
