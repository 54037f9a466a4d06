/// Test doubles for the engine's external collaborators
///
/// `MockTransport` stands in for the messaging platform. Pair it with
/// `MemoryLinkStore` to drive the engine entirely in-process.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::MockTransport;
///
/// let transport = MockTransport::new().with_channel("@news");
/// transport.set_member("@news", 42, MemberStatus::Member);
/// transport.fail_pointer(ContentPointer(7));
/// ```
mod transport;

pub use transport::{CopyRecord, MockTransport, BOT_ID, BOT_USERNAME};
