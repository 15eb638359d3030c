mod error;
mod event;
mod listener;
mod signal;
mod state;
pub mod store;
pub mod sync;
mod timeline;
pub mod transport;

pub use error::{StoreError, TimelineError};
pub use event::{Direction, Event, LOCAL_ID_PREFIX, MEMBER_TYPE, REDACTION_TYPE};
pub use listener::{EventCallback, ListenerId, ListenerRegistry};
pub use signal::{SignalSender, SignalStream, TimelineSignal};
pub use state::{Membership, RoomState};
pub use store::{FileStore, MemoryStore, PaginationFrom, ReceiptData, Store};
pub use sync::{EventContext, InvitedRoomSync, JoinedRoomSync, PaginationResponse};
pub use timeline::{EventTimeline, TimelineBuilder};
pub use transport::{MessagesRequest, Transport, TransportError};
