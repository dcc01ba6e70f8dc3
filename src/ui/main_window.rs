use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use adw::prelude::*;
use adw::Application;
use log::{error, warn};

use crate::api::client::ApiClient;
use crate::api::models::{CreateSender, Sender, User};
use crate::app::AppState;
use crate::preferences::PreferenceStore;
use crate::storage::SenderCache;
use crate::ui::sender_view::SenderView;
use crate::ui::sidebar::Sidebar;

pub fn show_main_window(app: &Application, client: Arc<ApiClient>, user: User) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("Buzz")
        .default_width(1080)
        .default_height(680)
        .build();

    let overlay = adw::ToastOverlay::new();

    let prefs = Rc::new(RefCell::new(PreferenceStore::open_default().ok()));
    let pinned = prefs.borrow().as_ref().is_some_and(|p| p.sidebar_pinned());

    let split = adw::Flap::builder()
        .reveal_flap(true)
        .locked(pinned)
        .modal(false)
        .build();

    let sidebar = Rc::new(Sidebar::new());
    split.set_flap(Some(&sidebar.widget()));

    // Any rejected credential sends the operator back to the login window.
    let on_unauthorized: Rc<dyn Fn()> = {
        let app = app.clone();
        let window = window.clone();
        Rc::new(move || {
            if !window.is_visible() {
                return;
            }
            crate::ui::login::show_login_window(&app, &AppState::load());
            window.close();
        })
    };

    let view = SenderView::new(client.clone(), on_unauthorized.clone());
    split.set_content(Some(&view.widget()));
    overlay.set_child(Some(&split));

    let container = gtk4::Box::new(gtk4::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let title = gtk4::Label::new(Some(&format!("Buzz · {}", user.name)));
    header.set_title_widget(Some(&title));

    let pin_btn = gtk4::ToggleButton::new();
    pin_btn.set_icon_name("view-pin-symbolic");
    pin_btn.set_tooltip_text(Some("Pin sidebar"));
    pin_btn.set_active(pinned);
    header.pack_start(&pin_btn);

    let new_sender_btn = gtk4::Button::with_label("New Sender");
    new_sender_btn.add_css_class("suggested-action");
    header.pack_end(&new_sender_btn);

    let admin_btn = gtk4::Button::from_icon_name("system-users-symbolic");
    admin_btn.set_tooltip_text(Some("Users & Roles"));
    header.pack_start(&admin_btn);

    let edit_btn = gtk4::Button::with_label("Edit");
    header.pack_end(&edit_btn);

    let delete_btn = gtk4::Button::with_label("Delete");
    delete_btn.add_css_class("destructive-action");
    header.pack_end(&delete_btn);

    container.append(&header);
    container.append(&overlay);
    window.set_content(Some(&container));
    window.present();

    {
        let view = view.clone();
        window.connect_close_request(move |_| {
            view.teardown();
            glib::Propagation::Proceed
        });
    }

    {
        let split = split.clone();
        let prefs = prefs.clone();
        let overlay = overlay.clone();
        pin_btn.connect_toggled(move |btn| {
            let pinned = btn.is_active();
            split.set_locked(pinned);
            if pinned {
                split.set_reveal_flap(true);
            }
            if let Some(store) = prefs.borrow_mut().as_mut() {
                if let Err(e) = store.set_sidebar_pin(pinned) {
                    overlay.add_toast(adw::Toast::new(&format!("Failed to save preference: {e}")));
                }
            }
        });
    }

    {
        let view = view.clone();
        sidebar.connect_selected(move |sender| view.show_sender(sender));
    }

    let cache = Rc::new(RefCell::new(match SenderCache::open_default() {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!("Sender cache unavailable: {e}");
            None
        }
    }));
    if let Some(cache) = cache.borrow().as_ref() {
        if let Ok(cached) = cache.get_senders(Some(200)) {
            if !cached.is_empty() {
                sidebar.set_items(cached);
            }
        }
    }

    let reload: Rc<dyn Fn()> = {
        let client = client.clone();
        let sidebar = sidebar.clone();
        let cache = cache.clone();
        let overlay = overlay.clone();
        let on_unauthorized = on_unauthorized.clone();
        Rc::new(move || {
            let client = client.clone();
            let sidebar = sidebar.clone();
            let cache = cache.clone();
            let overlay = overlay.clone();
            let on_unauthorized = on_unauthorized.clone();
            crate::utils::run_async_to_main(async move { client.senders().await }, move |res| {
                match res {
                    Ok(items) => {
                        if let Some(cache) = cache.borrow_mut().as_mut() {
                            if let Err(e) = cache.replace_all(&items) {
                                warn!("Failed to cache senders: {e}");
                            }
                        }
                        sidebar.set_items(items);
                    }
                    Err(e) if e.is_unauthorized() => on_unauthorized(),
                    Err(err) => {
                        error!("Failed to load senders: {err}");
                        overlay.add_toast(adw::Toast::new(&format!("Failed to load senders: {}", err)));
                    }
                }
            });
        })
    };
    reload();

    {
        let client = client.clone();
        let view = view.clone();
        let overlay = overlay.clone();
        let reload = reload.clone();
        let cache = cache.clone();
        delete_btn.connect_clicked(move |_| {
            let Some(id) = view.current_sender().and_then(|s| s.id) else {
                overlay.add_toast(adw::Toast::new("Select a sender first."));
                return;
            };
            let client = client.clone();
            let view = view.clone();
            let overlay = overlay.clone();
            let reload = reload.clone();
            let cache = cache.clone();
            crate::utils::run_async_to_main(async move { client.delete_sender(id).await }, move |res| {
                match res {
                    Ok(()) => {
                        if let Some(cache) = cache.borrow().as_ref() {
                            if let Err(e) = cache.remove_sender(id) {
                                warn!("Failed to drop sender {id} from cache: {e}");
                            }
                        }
                        view.clear();
                        reload();
                    }
                    Err(err) => {
                        overlay.add_toast(adw::Toast::new(&format!("Failed to delete sender: {}", err)));
                    }
                }
            });
        });
    }

    {
        let window = window.clone();
        let client = client.clone();
        let on_unauthorized = on_unauthorized.clone();
        admin_btn.connect_clicked(move |_| {
            crate::ui::admin::show_admin_window(&window, client.clone(), on_unauthorized.clone());
        });
    }

    // The config menu follows the signed-in user's role; without a known role
    // the button stays and the backend decides.
    {
        let client = client.clone();
        let admin_btn = admin_btn.clone();
        crate::utils::run_async_to_main(async move { client.roles().await }, move |res| match res {
            Ok(roles) => {
                if let Some(actions) = user.menu_actions(&roles) {
                    admin_btn.set_visible(actions.can_configure());
                }
            }
            Err(e) => {
                warn!("Roles unavailable, hiding user management: {e}");
                admin_btn.set_visible(false);
            }
        });
    }

    {
        let overlay = overlay.clone();
        let window = window.clone();
        let client = client.clone();
        let view = view.clone();
        let reload = reload.clone();
        let on_unauthorized = on_unauthorized.clone();
        edit_btn.connect_clicked(move |_| {
            let Some(sender) = view.current_sender() else {
                overlay.add_toast(adw::Toast::new("Select a sender first."));
                return;
            };
            edit_sender_dialog(&window, sender, {
                let client = client.clone();
                let overlay = overlay.clone();
                let view = view.clone();
                let reload = reload.clone();
                let on_unauthorized = on_unauthorized.clone();
                move |updated: Sender| {
                    let client = client.clone();
                    let overlay = overlay.clone();
                    let view = view.clone();
                    let reload = reload.clone();
                    let on_unauthorized = on_unauthorized.clone();
                    crate::utils::run_async_to_main(async move { client.update_sender(&updated).await }, move |res| {
                        match res {
                            Ok(()) => {
                                reload();
                                view.refresh();
                            }
                            Err(e) if e.is_unauthorized() => on_unauthorized(),
                            Err(err) => {
                                error!("Failed to update sender: {err}");
                                overlay.add_toast(adw::Toast::new(&format!("Failed to update sender: {}", err)));
                            }
                        }
                    });
                }
            });
        });
    }

    {
        let overlay = overlay.clone();
        let window = window.clone();
        new_sender_btn.connect_clicked(move |_| {
            let dialog = gtk4::Dialog::builder()
                .title("New Sender")
                .transient_for(&window)
                .modal(true)
                .build();
            let content = gtk4::Box::new(gtk4::Orientation::Vertical, 12);
            content.set_margin_top(12);
            content.set_margin_bottom(12);
            content.set_margin_start(12);
            content.set_margin_end(12);

            let name_entry = gtk4::Entry::new();
            name_entry.set_placeholder_text(Some("Name"));
            name_entry.set_hexpand(true);
            content.append(&name_entry);

            let token_entry = gtk4::Entry::new();
            token_entry.set_placeholder_text(Some("Token"));
            token_entry.set_hexpand(true);
            content.append(&token_entry);

            dialog.set_child(Some(&content));
            let _ = dialog.add_button("Cancel", gtk4::ResponseType::Cancel);
            let ok_btn = dialog.add_button("Create", gtk4::ResponseType::Ok);
            ok_btn.add_css_class("suggested-action");
            dialog.set_default_response(gtk4::ResponseType::Ok);

            let overlay2 = overlay.clone();
            let client = client.clone();
            let reload = reload.clone();
            dialog.connect_response(move |dlg, resp| {
                if resp == gtk4::ResponseType::Ok {
                    let form = CreateSender {
                        name: name_entry.text().trim().to_string(),
                        token: token_entry.text().trim().to_string(),
                    };
                    if let Err(msg) = form.validate() {
                        overlay2.add_toast(adw::Toast::new(&msg));
                        return;
                    }
                    let client = client.clone();
                    let overlay3 = overlay2.clone();
                    let reload = reload.clone();
                    crate::utils::run_async_to_main(async move { client.create_sender(&form).await }, move |res| {
                        match res {
                            Ok(()) => reload(),
                            Err(err) => {
                                overlay3.add_toast(adw::Toast::new(&format!("Failed to create sender: {}", err)));
                            }
                        }
                    });
                }
                dlg.close();
            });

            dialog.present();
        });
    }
}

/// Name and webhook are editable; the token is shown but fixed once issued.
fn edit_sender_dialog(window: &adw::ApplicationWindow, sender: Sender, on_submit: impl Fn(Sender) + 'static) {
    let dialog = gtk4::Dialog::builder()
        .title("Edit Sender")
        .transient_for(window)
        .modal(true)
        .build();
    let content = gtk4::Box::new(gtk4::Orientation::Vertical, 12);
    content.set_margin_top(12);
    content.set_margin_bottom(12);
    content.set_margin_start(12);
    content.set_margin_end(12);

    let name_entry = gtk4::Entry::new();
    name_entry.set_placeholder_text(Some("Name"));
    name_entry.set_text(&sender.name);
    content.append(&name_entry);

    let token_entry = gtk4::Entry::new();
    token_entry.set_text(&sender.token);
    token_entry.set_sensitive(false);
    content.append(&token_entry);

    let webhook_entry = gtk4::Entry::new();
    webhook_entry.set_placeholder_text(Some("Webhook URL"));
    webhook_entry.set_text(&sender.webhook);
    content.append(&webhook_entry);

    let feedback = gtk4::Label::new(None);
    feedback.add_css_class("error");
    feedback.set_halign(gtk4::Align::Start);
    content.append(&feedback);

    dialog.set_child(Some(&content));
    let _ = dialog.add_button("Cancel", gtk4::ResponseType::Cancel);
    let ok_btn = dialog.add_button("Update", gtk4::ResponseType::Ok);
    ok_btn.add_css_class("suggested-action");
    dialog.set_default_response(gtk4::ResponseType::Ok);

    dialog.connect_response(move |dlg, resp| {
        if resp == gtk4::ResponseType::Ok {
            let form = CreateSender {
                name: name_entry.text().trim().to_string(),
                token: sender.token.clone(),
            };
            if let Err(msg) = form.validate() {
                feedback.set_label(&msg);
                return;
            }
            let mut updated = sender.clone();
            updated.name = form.name;
            updated.webhook = webhook_entry.text().trim().to_string();
            on_submit(updated);
        }
        dlg.close();
    });
    dialog.present();
}
