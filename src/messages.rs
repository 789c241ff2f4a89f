/// A lawn mower command received from Home Assistant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MowerCommand {
    StartMowing,
    Pause,
    Dock,
}

/// Everything the MQTT event loop hands to the manager task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeMessage {
    Command(MowerCommand),
    /// Home Assistant restarted and needs discovery configs again.
    HomeAssistantOnline,
}
