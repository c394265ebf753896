pub mod bridge;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod group;
pub mod mesh;
mod pump;
pub mod topic;

pub use bridge::{Bridge, PendingBridge};
pub use connection::{
    channel_connection, Connection, ConnectionHandle, ConnectionId, FrameReader, FrameWriter,
    RemoteEnd,
};
pub use discovery::dht::{DhtDiscovery, DhtPhase, DhtSettings, RoutingTable};
pub use discovery::local::{LocalDiscovery, LocalDiscoveryLoop};
pub use discovery::{connect_if_not_self, DiscoveredPeer, DiscoverySource, PeerConnector};
pub use error::{
    ConnectionIoError, DiscoveryError, GroupError, PeerConnectError, RegistryError,
};
pub use group::{GroupHandle, GroupMessage, GroupService, LocalBus, Subscription};
pub use mesh::{Mesh, MeshGroup, PeerInfo};
pub use topic::{Topic, TopicRegistry};
