pub mod client;
pub mod filter;
pub mod reader;
pub mod session;
pub mod types;
pub mod xml;

pub use client::CalDavClient;
pub use filter::{ComponentKind, Filter};
pub use reader::{MultistatusReader, NodeKind, Tag, XmlNode};
pub use session::CalDavSession;
pub use types::{Calendar, CalendarResource, Depth, PrincipalMatch, PropSpec, ReportEntry};
