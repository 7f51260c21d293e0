pub mod history;
pub mod product;
pub mod response;
pub mod webhook;
pub mod withdraw_request;
