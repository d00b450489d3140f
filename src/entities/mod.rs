pub mod role;
pub mod role_rule;
pub mod session;
pub mod user;
pub mod user_role;

pub use role::Entity as Role;
pub use role_rule::Entity as RoleRule;
pub use session::Entity as Session;
pub use user::Entity as User;
pub use user_role::Entity as UserRole;
