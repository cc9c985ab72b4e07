pub mod email;
pub mod slack;

pub use email::GraphMailAdapter;
pub use slack::SlackAdapter;
