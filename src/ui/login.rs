use std::rc::Rc;
use std::sync::Arc;

use adw::prelude::*;
use adw::Application;
use gtk4 as gtk;
use log::{error, info};

use crate::api::client::ApiClient;
use crate::api::models::User;
use crate::app::AppState;
use crate::error::ApiError;

pub fn show_login_window(app: &Application, state: &AppState) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("Buzz Login")
        .default_width(420)
        .default_height(300)
        .resizable(false)
        .build();

    let toast_overlay = adw::ToastOverlay::new();

    // Root container
    let root = gtk::Box::new(gtk::Orientation::Vertical, 12);
    root.set_margin_top(24);
    root.set_margin_bottom(24);
    root.set_margin_start(24);
    root.set_margin_end(24);

    let title = gtk::Label::new(Some("Sign in to Buzz"));
    title.add_css_class("title-2");
    title.set_halign(gtk::Align::Start);
    root.append(&title);

    let server_entry = gtk::Entry::new();
    server_entry.set_placeholder_text(Some("Server URL (e.g. http://localhost:3000)"));
    server_entry.set_text(&state.base_url);
    server_entry.set_hexpand(true);

    let user_entry = gtk::Entry::new();
    user_entry.set_placeholder_text(Some("Username"));
    user_entry.set_text(&state.username);
    user_entry.set_hexpand(true);

    let pass_entry = gtk::PasswordEntry::new();
    pass_entry.set_placeholder_text(Some("Password"));
    pass_entry.set_hexpand(true);

    let form = gtk::Box::new(gtk::Orientation::Vertical, 8);
    form.append(&server_entry);
    form.append(&user_entry);
    form.append(&pass_entry);
    root.append(&form);

    let status = gtk::Label::new(None);
    status.add_css_class("dim-label");
    status.set_halign(gtk::Align::Start);
    root.append(&status);

    let login_btn = gtk::Button::with_label("Sign in");
    login_btn.add_css_class("suggested-action");
    login_btn.set_halign(gtk::Align::End);
    root.append(&login_btn);

    toast_overlay.set_child(Some(&root));
    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let header_title = gtk::Label::new(Some("Buzz"));
    header.set_title_widget(Some(&header_title));
    container.append(&header);
    container.append(&toast_overlay);
    window.set_content(Some(&container));

    let on_login = {
        let app = app.clone();
        let window = window.clone();
        let overlay = toast_overlay.clone();
        let server_entry = server_entry.clone();
        let user_entry = user_entry.clone();
        let pass_entry = pass_entry.clone();
        let timeout = state.request_timeout();
        move || {
            let url = crate::utils::normalize_url(&server_entry.text());
            let username = user_entry.text().to_string();
            let password = pass_entry.text().to_string();
            if server_entry.text().trim().is_empty() || username.is_empty() {
                overlay.add_toast(adw::Toast::new("Username cannot be empty"));
                return;
            }
            if password.is_empty() {
                overlay.add_toast(adw::Toast::new("Password cannot be empty"));
                return;
            }

            let client = match ApiClient::with_timeout(&url, timeout) {
                Ok(client) => client,
                Err(e) => {
                    overlay.add_toast(adw::Toast::new(&format!("Invalid server URL: {e}")));
                    return;
                }
            };

            status.set_label("Signing in…");
            let status_label = status.clone();
            let app2 = app.clone();
            let window2 = window.clone();
            let overlay2 = overlay.clone();
            let login = async move {
                client.login(&username, &password).await?;
                // The cookie-bound record carries the role the menus depend on.
                let user = client.identify().await?;
                Ok::<(ApiClient, User), ApiError>((client, user))
            };
            crate::utils::run_async_to_main(login, move |res| {
                match res {
                    Ok((client, user)) => {
                        info!("Signed in as {}", user.username);
                        status_label.set_label("");
                        let mut st = AppState::load();
                        st.base_url = client.base_url().as_str().trim_end_matches('/').to_string();
                        st.username = user.username.clone();
                        if let Err(e) = st.save() {
                            overlay2.add_toast(adw::Toast::new(&format!("Failed to save settings: {}", e)));
                        }
                        crate::ui::main_window::show_main_window(&app2, Arc::new(client), user);
                        window2.close();
                    }
                    Err(ApiError::Unauthorized) => {
                        status_label.set_label("Invalid username or password");
                    }
                    Err(err) => {
                        error!("Login failed: {err}");
                        status_label.set_label("Sign in failed");
                        overlay2.add_toast(adw::Toast::new(&err.to_string()));
                    }
                }
            });
        }
    };

    let on_login: Rc<dyn Fn()> = Rc::new(on_login);
    {
        let on_login = on_login.clone();
        login_btn.connect_clicked(move |_| (on_login)());
    }
    {
        let on_login = on_login.clone();
        user_entry.connect_activate(move |_| (on_login)());
    }
    {
        let on_login = on_login.clone();
        pass_entry.connect_activate(move |_| (on_login)());
    }

    window.present();
}
