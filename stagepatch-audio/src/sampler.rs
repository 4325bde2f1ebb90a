//! Sampler backend speaking LSCP, the LinuxSampler control protocol.
//!
//! LSCP is line based: each command is one CRLF-terminated line, answered
//! by `OK`, `OK[<id>]`, `WRN...` or `ERR:<code>:<message>`. `GET ... INFO`
//! queries answer with `KEY: value` lines closed by a lone `.`.
//!
//! The connection is opened lazily on first use and kept in the engine.
//! On connect the sampler gets one JACK audio device and one JACK MIDI
//! device named after our client; every instrument then claims a sampler
//! channel, two audio channels and one MIDI port on those devices.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stagepatch_core::config::Config;
use stagepatch_core::engine::backend::{EngineEvent, EngineEventSender, SoundEngine};
use stagepatch_core::error::{BackendError, BackendResult};
use stagepatch_types::EngineHandle;

use crate::plugin_host::{instrument_format, InstrumentFormat};

/// Line transport to a sampler.
pub trait LscpTransport: Send {
    fn send_line(&mut self, line: &str) -> io::Result<()>;
    /// Next response line, without the line terminator.
    fn read_line(&mut self) -> io::Result<String>;
}

pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpTransport {
    pub fn connect(addr: &str, timeout: Duration) -> io::Result<Self> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", addr));
        for sock in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&sock, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout.max(Duration::from_secs(5))))?;
                    let writer = stream.try_clone()?;
                    return Ok(Self {
                        reader: BufReader::new(stream),
                        writer,
                    });
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl LscpTransport for TcpTransport {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "sampler closed the connection"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Quote a path for `LOAD INSTRUMENT`.
pub fn escape_lscp(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

/// One open connection plus the devices we created on it.
struct Session {
    transport: Box<dyn LscpTransport>,
    audio_device: u32,
    midi_device: u32,
    audio_channels: u32,
    midi_ports: u32,
    free_audio: Vec<u32>,
    free_midi: Vec<u32>,
}

impl Session {
    fn open(mut transport: Box<dyn LscpTransport>, client: &str) -> BackendResult<Self> {
        command(transport.as_mut(), "RESET")?;
        command(transport.as_mut(), "SET VOLUME 1")?;
        let name = escape_lscp(client);
        let audio_device = command_id(
            transport.as_mut(),
            &format!("CREATE AUDIO_OUTPUT_DEVICE JACK NAME='{}' CHANNELS=0", name),
        )?;
        let midi_device = command_id(
            transport.as_mut(),
            &format!("CREATE MIDI_INPUT_DEVICE JACK NAME='{}' PORTS=0", name),
        )?;
        Ok(Self {
            transport,
            audio_device,
            midi_device,
            audio_channels: 0,
            midi_ports: 0,
            free_audio: Vec::new(),
            free_midi: Vec::new(),
        })
    }

    fn command(&mut self, cmd: &str) -> BackendResult<Option<u32>> {
        command(self.transport.as_mut(), cmd)
    }

    fn audio_channel(&mut self) -> BackendResult<u32> {
        if let Some(chan) = self.free_audio.pop() {
            return Ok(chan);
        }
        let chan = self.audio_channels;
        self.command(&format!(
            "SET AUDIO_OUTPUT_DEVICE_PARAMETER {} CHANNELS={}",
            self.audio_device,
            chan + 1
        ))?;
        self.audio_channels += 1;
        Ok(chan)
    }

    fn midi_port(&mut self) -> BackendResult<u32> {
        if let Some(port) = self.free_midi.pop() {
            return Ok(port);
        }
        let port = self.midi_ports;
        self.command(&format!(
            "SET MIDI_INPUT_DEVICE_PARAMETER {} PORTS={}",
            self.midi_device,
            port + 1
        ))?;
        self.midi_ports += 1;
        Ok(port)
    }

    fn info_name(&mut self, query: &str) -> BackendResult<String> {
        self.transport.send_line(query)?;
        let mut name = None;
        loop {
            let line = self.transport.read_line()?;
            if line == "." {
                break;
            }
            if let Some(rest) = line.strip_prefix("ERR:") {
                return Err(BackendError::Protocol(rest.to_string()));
            }
            if let Some((key, value)) = line.split_once(':') {
                if key.trim() == "NAME" {
                    name = Some(value.trim().trim_matches('\'').to_string());
                }
            }
        }
        name.ok_or_else(|| BackendError::Protocol(format!("no NAME in reply to '{}'", query)))
    }
}

fn command(transport: &mut dyn LscpTransport, cmd: &str) -> BackendResult<Option<u32>> {
    transport.send_line(cmd)?;
    let reply = transport.read_line()?;
    log::trace!(target: "sampler", "{} -> {}", cmd, reply);
    parse_reply(&reply).map_err(|e| {
        log::warn!(target: "sampler", "'{}' failed: {}", cmd, e);
        e
    })
}

fn command_id(transport: &mut dyn LscpTransport, cmd: &str) -> BackendResult<u32> {
    command(transport, cmd)?
        .ok_or_else(|| BackendError::Protocol(format!("no id in reply to '{}'", cmd)))
}

/// Parse a single-line LSCP reply. `OK[n]` yields the id.
fn parse_reply(reply: &str) -> BackendResult<Option<u32>> {
    if reply == "OK" {
        return Ok(None);
    }
    if let Some(rest) = reply.strip_prefix("OK[") {
        return rest
            .trim_end_matches(']')
            .parse()
            .map(Some)
            .map_err(|_| BackendError::Protocol(format!("bad id in '{}'", reply)));
    }
    if reply.starts_with("WRN") {
        log::warn!(target: "sampler", "{}", reply);
        let id = reply
            .strip_prefix("WRN[")
            .and_then(|r| r.split(']').next())
            .and_then(|n| n.parse().ok());
        return Ok(id);
    }
    if let Some(rest) = reply.strip_prefix("ERR:") {
        let message = rest.split_once(':').map_or(rest, |(_, msg)| msg);
        return Err(BackendError::Protocol(message.to_string()));
    }
    Err(BackendError::Protocol(format!("unexpected reply '{}'", reply)))
}

#[derive(Debug, Clone)]
struct SamplerChannel {
    channel: u32,
    audio: [u32; 2],
    midi_port: u32,
    name: String,
    path: PathBuf,
    midi_in: String,
    audio_out: [String; 2],
}

type Connector = Box<dyn FnMut() -> io::Result<Box<dyn LscpTransport>> + Send>;

pub struct SamplerEngine {
    client_name: String,
    connector: Connector,
    session: Option<Session>,
    channels: BTreeMap<EngineHandle, SamplerChannel>,
    next_id: u32,
    events: Option<EngineEventSender>,
}

impl SamplerEngine {
    /// Engine that reaches the sampler through `connector` on first use.
    pub fn new(client_name: &str, connector: Connector) -> Self {
        Self {
            client_name: client_name.to_string(),
            connector,
            session: None,
            channels: BTreeMap::new(),
            next_id: 0,
            events: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let addr = config.sampler_addr();
        let timeout = config.sampler_connect_timeout();
        Self::new(
            &format!("{}_LS", config.client_name()),
            Box::new(move || {
                TcpTransport::connect(&addr, timeout).map(|t| Box::new(t) as Box<dyn LscpTransport>)
            }),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn instrument_path(&self, handle: EngineHandle) -> Option<&Path> {
        self.channels.get(&handle).map(|c| c.path.as_path())
    }

    fn message(&self, text: String) {
        log::info!(target: "sampler", "{}", text);
        if let Some(tx) = &self.events {
            let _ = tx.send(EngineEvent::UserMessage(text));
        }
    }

    fn session(&mut self) -> BackendResult<&mut Session> {
        if self.session.is_none() {
            let transport = (self.connector)()?;
            let session = Session::open(transport, &self.client_name)?;
            self.message(format!("Connected to sampler as {}", self.client_name));
            self.session = Some(session);
        }
        self.session
            .as_mut()
            .ok_or_else(|| BackendError::Other("sampler session unavailable".into()))
    }

    /// Drop the connection after an I/O failure so the next request reconnects.
    fn check_connection<T>(&mut self, result: BackendResult<T>) -> BackendResult<T> {
        if let Err(BackendError::Io(e)) = &result {
            log::warn!(target: "sampler", "connection lost: {}", e);
            self.session = None;
            self.channels.clear();
        }
        result
    }

    fn create_channel(
        session: &mut Session,
        client: &str,
        path: &Path,
        format: InstrumentFormat,
    ) -> BackendResult<SamplerChannel> {
        let channel = command_id(session.transport.as_mut(), "ADD CHANNEL")?;
        let mut claimed_audio = Vec::new();
        let mut claimed_midi = None;

        let result = (|| -> BackendResult<SamplerChannel> {
            let engine = match format {
                InstrumentFormat::Sfz => "SFZ",
                InstrumentFormat::Gig => "GIG",
            };
            session.command(&format!("LOAD ENGINE {} {}", engine, channel))?;

            let left = session.audio_channel()?;
            claimed_audio.push(left);
            let right = session.audio_channel()?;
            claimed_audio.push(right);
            let midi_port = session.midi_port()?;
            claimed_midi = Some(midi_port);

            session.command(&format!(
                "SET CHANNEL AUDIO_OUTPUT_DEVICE {} {}",
                channel, session.audio_device
            ))?;
            session.command(&format!("SET CHANNEL AUDIO_OUTPUT_CHANNEL {} 0 {}", channel, left))?;
            session.command(&format!("SET CHANNEL AUDIO_OUTPUT_CHANNEL {} 1 {}", channel, right))?;
            session.command(&format!(
                "SET CHANNEL MIDI_INPUT_DEVICE {} {}",
                channel, session.midi_device
            ))?;
            session.command(&format!("SET CHANNEL MIDI_INPUT_PORT {} {}", channel, midi_port))?;
            session.command(&format!(
                "LOAD INSTRUMENT NON_MODAL '{}' 0 {}",
                escape_lscp(&path.to_string_lossy()),
                channel
            ))?;

            let device = session.audio_device;
            let left_name =
                session.info_name(&format!("GET AUDIO_OUTPUT_CHANNEL INFO {} {}", device, left))?;
            let right_name =
                session.info_name(&format!("GET AUDIO_OUTPUT_CHANNEL INFO {} {}", device, right))?;
            let midi_name = session.info_name(&format!(
                "GET MIDI_INPUT_PORT INFO {} {}",
                session.midi_device, midi_port
            ))?;

            Ok(SamplerChannel {
                channel,
                audio: [left, right],
                midi_port,
                name: String::new(),
                path: path.to_path_buf(),
                midi_in: format!("{}:{}", client, midi_name),
                audio_out: [
                    format!("{}:{}", client, left_name),
                    format!("{}:{}", client, right_name),
                ],
            })
        })();

        if result.is_err() {
            session.free_audio.extend(claimed_audio.into_iter().rev());
            session.free_midi.extend(claimed_midi);
            let _ = session.command(&format!("REMOVE CHANNEL {}", channel));
        }
        result
    }

    /// Remove every channel and the devices we created, then disconnect.
    pub fn shutdown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        for ch in self.channels.values() {
            let _ = session.command(&format!("REMOVE CHANNEL {}", ch.channel));
        }
        self.channels.clear();
        let _ = session.command(&format!("DESTROY AUDIO_OUTPUT_DEVICE {}", session.audio_device));
        let _ = session.command(&format!("DESTROY MIDI_INPUT_DEVICE {}", session.midi_device));
        log::info!(target: "sampler", "disconnected from sampler");
    }
}

impl Drop for SamplerEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SoundEngine for SamplerEngine {
    fn engine_name(&self) -> &'static str {
        "sampler"
    }

    fn init_engine(&mut self, events: EngineEventSender) -> BackendResult {
        let _ = events.send(EngineEvent::Initialized);
        self.events = Some(events);
        Ok(())
    }

    fn add_sfz(&mut self, path: &Path) -> BackendResult<EngineHandle> {
        if !path.is_file() {
            return Err(BackendError::FileNotFound(path.to_path_buf()));
        }
        let format = instrument_format(path)?;

        let client = self.client_name.clone();
        let created = self
            .session()
            .and_then(|session| Self::create_channel(session, &client, path, format));
        let mut channel = self.check_connection(created)?;

        let handle = EngineHandle::new(self.next_id);
        self.next_id += 1;
        channel.name = format!("LS_sfz_{}", handle);
        log::debug!(
            target: "sampler",
            "{} on sampler channel {} (audio {:?}, midi {})",
            channel.name,
            channel.channel,
            channel.audio,
            channel.midi_port
        );
        self.channels.insert(handle, channel);
        Ok(handle)
    }

    fn remove_sfz(&mut self, handle: EngineHandle) -> BackendResult {
        let Some(ch) = self.channels.remove(&handle) else {
            log::error!(target: "sampler", "remove_sfz: unknown handle {}", handle);
            return Err(BackendError::UnknownHandle(handle));
        };
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.free_audio.push(ch.audio[1]);
        session.free_audio.push(ch.audio[0]);
        session.free_midi.push(ch.midi_port);
        let removed = session
            .command(&format!("REMOVE CHANNEL {}", ch.channel))
            .map(|_| ());
        self.check_connection(removed)
    }

    fn plugin_name(&self, handle: EngineHandle) -> String {
        self.channels
            .get(&handle)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn midi_in_port_name(&self, handle: EngineHandle) -> String {
        self.channels
            .get(&handle)
            .map(|c| c.midi_in.clone())
            .unwrap_or_default()
    }

    fn audio_out_port_names(&self, handle: EngineHandle) -> [String; 2] {
        self.channels
            .get(&handle)
            .map(|c| c.audio_out.clone())
            .unwrap_or_default()
    }

    fn set_gain(&mut self, handle: EngineHandle, gain: f32) {
        let Some(channel) = self.channels.get(&handle).map(|c| c.channel) else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = session
            .command(&format!("SET CHANNEL VOLUME {} {:.3}", channel, gain.clamp(0.0, 1.0)))
            .map(|_| ());
        if let Err(e) = self.check_connection(result) {
            self.message(format!("Could not set sampler volume: {}", e));
        }
    }

    fn client_names(&self) -> Vec<String> {
        vec![self.client_name.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeState {
        log: Vec<String>,
        replies: VecDeque<String>,
        next_channel: u32,
        fail_loading: Vec<String>,
        connects: usize,
    }

    /// Scripted sampler that answers like LinuxSampler would.
    #[derive(Clone, Default)]
    struct FakeSampler(Arc<Mutex<FakeState>>);

    impl FakeSampler {
        fn commands(&self) -> Vec<String> {
            self.0.lock().log.clone()
        }

        fn connector(&self) -> Connector {
            let fake = self.clone();
            Box::new(move || {
                fake.0.lock().connects += 1;
                Ok(Box::new(fake.clone()) as Box<dyn LscpTransport>)
            })
        }

        fn reply_to(state: &mut FakeState, line: &str) -> Vec<String> {
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["ADD", "CHANNEL"] => {
                    let id = state.next_channel;
                    state.next_channel += 1;
                    vec![format!("OK[{}]", id)]
                }
                ["CREATE", ..] => vec!["OK[0]".into()],
                ["GET", "AUDIO_OUTPUT_CHANNEL", "INFO", _, chan] => {
                    vec![format!("NAME: {}", chan), "IS_MIX_CHANNEL: false".into(), ".".into()]
                }
                ["GET", "MIDI_INPUT_PORT", "INFO", _, port] => {
                    vec![format!("NAME: midi_in_{}", port), ".".into()]
                }
                ["LOAD", "INSTRUMENT", ..]
                    if state.fail_loading.iter().any(|p| line.contains(p.as_str())) =>
                {
                    vec!["ERR:104:Could not load instrument".into()]
                }
                _ => vec!["OK".into()],
            }
        }
    }

    impl LscpTransport for FakeSampler {
        fn send_line(&mut self, line: &str) -> io::Result<()> {
            let mut state = self.0.lock();
            state.log.push(line.to_string());
            let replies = Self::reply_to(&mut state, line);
            state.replies.extend(replies);
            Ok(())
        }

        fn read_line(&mut self) -> io::Result<String> {
            self.0
                .lock()
                .replies
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no reply"))
        }
    }

    fn sfz(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "<region> sample=a.wav\n").unwrap();
        path
    }

    #[test]
    fn escapes_quotes_and_control_characters() {
        assert_eq!(escape_lscp("it's \"here\"\\"), "it\\'s \\\"here\\\"\\\\");
        assert_eq!(escape_lscp("a\tb\nc"), "a\\tb\\nc");
    }

    #[test]
    fn parses_replies() {
        assert_eq!(parse_reply("OK"), Ok(None));
        assert_eq!(parse_reply("OK[12]"), Ok(Some(12)));
        assert_eq!(parse_reply("WRN[3]:2:device exists"), Ok(Some(3)));
        assert_eq!(
            parse_reply("ERR:104:Could not load"),
            Err(BackendError::Protocol("Could not load".into()))
        );
        assert!(parse_reply("garbage").is_err());
    }

    #[test]
    fn connects_lazily_and_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSampler::default();
        let mut engine = SamplerEngine::new("live_LS", fake.connector());
        assert!(!engine.is_connected());

        engine.add_sfz(&sfz(&dir, "a.sfz")).unwrap();
        engine.add_sfz(&sfz(&dir, "b.sfz")).unwrap();
        assert!(engine.is_connected());
        assert_eq!(fake.0.lock().connects, 1);

        let commands = fake.commands();
        assert_eq!(commands[0], "RESET");
        assert_eq!(commands[2], "CREATE AUDIO_OUTPUT_DEVICE JACK NAME='live_LS' CHANNELS=0");
        assert_eq!(commands[3], "CREATE MIDI_INPUT_DEVICE JACK NAME='live_LS' PORTS=0");
    }

    #[test]
    fn add_sends_the_channel_setup_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = sfz(&dir, "piano.sfz");
        let fake = FakeSampler::default();
        let mut engine = SamplerEngine::new("live_LS", fake.connector());
        let h = engine.add_sfz(&path).unwrap();

        let commands: Vec<String> = fake.commands().into_iter().skip(4).collect();
        let expected = vec![
            "ADD CHANNEL".to_string(),
            "LOAD ENGINE SFZ 0".into(),
            "SET AUDIO_OUTPUT_DEVICE_PARAMETER 0 CHANNELS=1".into(),
            "SET AUDIO_OUTPUT_DEVICE_PARAMETER 0 CHANNELS=2".into(),
            "SET MIDI_INPUT_DEVICE_PARAMETER 0 PORTS=1".into(),
            "SET CHANNEL AUDIO_OUTPUT_DEVICE 0 0".into(),
            "SET CHANNEL AUDIO_OUTPUT_CHANNEL 0 0 0".into(),
            "SET CHANNEL AUDIO_OUTPUT_CHANNEL 0 1 1".into(),
            "SET CHANNEL MIDI_INPUT_DEVICE 0 0".into(),
            "SET CHANNEL MIDI_INPUT_PORT 0 0".into(),
            format!("LOAD INSTRUMENT NON_MODAL '{}' 0 0", escape_lscp(&path.to_string_lossy())),
            "GET AUDIO_OUTPUT_CHANNEL INFO 0 0".into(),
            "GET AUDIO_OUTPUT_CHANNEL INFO 0 1".into(),
            "GET MIDI_INPUT_PORT INFO 0 0".into(),
        ];
        assert_eq!(commands, expected);

        assert_eq!(engine.plugin_name(h), format!("LS_sfz_{}", h));
        assert_eq!(engine.midi_in_port_name(h), "live_LS:midi_in_0");
        assert_eq!(
            engine.audio_out_port_names(h),
            ["live_LS:0".to_string(), "live_LS:1".to_string()]
        );
    }

    #[test]
    fn removed_channels_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSampler::default();
        let mut engine = SamplerEngine::new("c", fake.connector());
        let a = engine.add_sfz(&sfz(&dir, "a.sfz")).unwrap();
        engine.remove_sfz(a).unwrap();
        assert!(fake.commands().contains(&"REMOVE CHANNEL 0".to_string()));

        let b = engine.add_sfz(&sfz(&dir, "b.sfz")).unwrap();
        assert_eq!(engine.audio_out_port_names(b), ["c:0".to_string(), "c:1".to_string()]);
        assert_eq!(engine.midi_in_port_name(b), "c:midi_in_0");
        let grows = fake
            .commands()
            .iter()
            .filter(|c| c.starts_with("SET AUDIO_OUTPUT_DEVICE_PARAMETER"))
            .count();
        assert_eq!(grows, 2);
    }

    #[test]
    fn failed_instrument_load_releases_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let bad = sfz(&dir, "broken.sfz");
        let fake = FakeSampler::default();
        fake.0.lock().fail_loading.push("broken.sfz".into());
        let mut engine = SamplerEngine::new("c", fake.connector());

        let err = engine.add_sfz(&bad).unwrap_err();
        assert_eq!(err, BackendError::Protocol("Could not load instrument".into()));
        assert_eq!(engine.channel_count(), 0);
        assert_eq!(fake.commands().last().map(String::as_str), Some("REMOVE CHANNEL 0"));

        let good = engine.add_sfz(&sfz(&dir, "good.sfz")).unwrap();
        assert_eq!(engine.audio_out_port_names(good), ["c:0".to_string(), "c:1".to_string()]);
    }

    #[test]
    fn gig_files_load_the_gig_engine() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSampler::default();
        let mut engine = SamplerEngine::new("c", fake.connector());
        engine.add_sfz(&sfz(&dir, "grand.gig")).unwrap();
        assert!(fake.commands().contains(&"LOAD ENGINE GIG 0".to_string()));
    }

    #[test]
    fn connect_failure_is_retried_on_next_add() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSampler::default();
        let mut inner = fake.connector();
        let mut attempts = 0;
        let connector: Connector = Box::new(move || {
            attempts += 1;
            if attempts == 1 {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            } else {
                inner()
            }
        });
        let mut engine = SamplerEngine::new("c", connector);
        let path = sfz(&dir, "a.sfz");
        assert!(matches!(engine.add_sfz(&path), Err(BackendError::Io(_))));
        assert!(!engine.is_connected());
        assert!(engine.add_sfz(&path).is_ok());
    }

    #[test]
    fn gain_sets_channel_volume() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSampler::default();
        let mut engine = SamplerEngine::new("c", fake.connector());
        let h = engine.add_sfz(&sfz(&dir, "a.sfz")).unwrap();
        engine.set_gain(h, 0.5);
        assert_eq!(fake.commands().last().map(String::as_str), Some("SET CHANNEL VOLUME 0 0.500"));
    }

    #[test]
    fn unknown_handle_is_an_error() {
        let fake = FakeSampler::default();
        let mut engine = SamplerEngine::new("c", fake.connector());
        let h = EngineHandle::new(3);
        assert_eq!(engine.remove_sfz(h), Err(BackendError::UnknownHandle(h)));
        assert!(!engine.is_connected());
    }

    #[test]
    fn shutdown_removes_channels_and_devices() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSampler::default();
        let mut engine = SamplerEngine::new("c", fake.connector());
        engine.add_sfz(&sfz(&dir, "a.sfz")).unwrap();
        engine.shutdown();
        let commands = fake.commands();
        let tail: Vec<&str> = commands.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            ["REMOVE CHANNEL 0", "DESTROY AUDIO_OUTPUT_DEVICE 0", "DESTROY MIDI_INPUT_DEVICE 0"]
        );
        assert!(!engine.is_connected());
    }
}
