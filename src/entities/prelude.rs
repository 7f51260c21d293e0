pub use super::histories::Entity as Histories;
pub use super::indexer_progress::Entity as IndexerProgress;
pub use super::products::Entity as Products;
pub use super::users::Entity as Users;
pub use super::withdraw_requests::Entity as WithdrawRequests;
