use serde::{Deserialize, Serialize};

use crate::midi_filter::MidiFilter;
use crate::{BusId, RtPortId, Side};

/// One side of a stereo pair: gain, external clients to auto-connect and
/// the realtime port once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortChannel {
    pub gain: f32,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(skip)]
    pub rt_port: Option<RtPortId>,
}

impl Default for PortChannel {
    fn default() -> Self {
        Self {
            gain: 1.0,
            clients: Vec::new(),
            rt_port: None,
        }
    }
}

impl PortChannel {
    /// Adds a client connection. Returns false if already present.
    pub fn add_client(&mut self, client: &str) -> bool {
        add_unique(&mut self.clients, client)
    }

    pub fn remove_client(&mut self, client: &str) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c != client);
        self.clients.len() != before
    }
}

/// An output mix destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub name: String,
    pub left: PortChannel,
    pub right: PortChannel,
}

impl Bus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            left: PortChannel::default(),
            right: PortChannel::default(),
        }
    }

    pub fn channel(&self, side: Side) -> &PortChannel {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn channel_mut(&mut self, side: Side) -> &mut PortChannel {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// A stereo audio input pair, routed to a bus when no layer claims it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInPort {
    pub name: String,
    pub left: PortChannel,
    pub right: PortChannel,
    pub destination_bus: BusId,
}

impl AudioInPort {
    pub fn new(name: &str, destination_bus: BusId) -> Self {
        Self {
            name: name.to_string(),
            left: PortChannel::default(),
            right: PortChannel::default(),
            destination_bus,
        }
    }

    pub fn channel(&self, side: Side) -> &PortChannel {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn channel_mut(&mut self, side: Side) -> &mut PortChannel {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// MIDI output to external gear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiOutPort {
    pub name: String,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(skip)]
    pub rt_port: Option<RtPortId>,
}

impl MidiOutPort {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            clients: Vec::new(),
            rt_port: None,
        }
    }
}

/// MIDI input from controllers. The filter is applied before any layer's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiInPort {
    pub name: String,
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default = "MidiFilter::pass_all")]
    pub filter: MidiFilter,
    #[serde(skip)]
    pub rt_port: Option<RtPortId>,
}

impl MidiInPort {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            clients: Vec::new(),
            filter: MidiFilter::pass_all(),
            rt_port: None,
        }
    }
}

fn add_unique(list: &mut Vec<String>, client: &str) -> bool {
    if list.iter().any(|c| c == client) {
        return false;
    }
    list.push(client.to_string());
    true
}

impl MidiOutPort {
    pub fn add_client(&mut self, client: &str) -> bool {
        add_unique(&mut self.clients, client)
    }

    pub fn remove_client(&mut self, client: &str) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c != client);
        self.clients.len() != before
    }
}

impl MidiInPort {
    pub fn add_client(&mut self, client: &str) -> bool {
        add_unique(&mut self.clients, client)
    }

    pub fn remove_client(&mut self, client: &str) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c != client);
        self.clients.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_lists_are_unique() {
        let mut bus = Bus::new("Main");
        assert!(bus.channel_mut(Side::Left).add_client("system:playback_1"));
        assert!(!bus.left.add_client("system:playback_1"));
        assert!(bus.left.remove_client("system:playback_1"));
        assert!(!bus.left.remove_client("system:playback_1"));
        assert_eq!(bus.right.gain, 1.0);
    }
}
