pub mod user;

pub use user::{AdminContext, UserContext, ADMIN_ROLE, USER_ID_HEADER, USER_ROLE_HEADER};
