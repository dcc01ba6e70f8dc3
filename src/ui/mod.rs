pub mod admin;
pub mod login;
pub mod main_window;
pub mod sender_view;
pub mod sidebar;
