// Managers Module
//
// Shared state that the control plane and the capture loop both touch.
//
// Each manager handles one specific concern:
// - NoiseConfigManager: Config Store, atomic read/replace of NoiseConfig
// - BroadcastManager: Subscriber registry and frame fan-out

pub mod broadcast_manager;
pub mod noise_config_manager;

pub use broadcast_manager::{
    BroadcastManager, BroadcastReport, ChannelSink, DeliveryError, FrameSink, SubscriberId,
};
pub use noise_config_manager::NoiseConfigManager;
