mod client;
mod signature;
mod types;
mod upload;

pub use client::{FlickrClient, FlickrError};
pub use signature::{Credentials, signature};
pub use types::{
    Photo, PhotoId, Photoset, PhotosetId, TicketId, TicketState, TicketStatus, User,
};
pub use upload::{UploadReceipt, UploadRequest};
