//! Shared client-side state: action statuses, cached lists and notices.

mod list;
mod notice;
mod status;

pub use list::{DetailSource, DetailStore, ListSource, ListStore, Page, Record};
pub use notice::{Notice, NoticeLevel, Notices};
pub use status::{
    ActionKey, ActionStatus, StatusBus, StatusUpdate, StoreError, Subscription, Ticket,
};
