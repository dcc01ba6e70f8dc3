use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use adw::prelude::*;
use gtk4 as gtk;
use log::{error, info};

use crate::api::client::ApiClient;
use crate::api::models::{CreateRole, CreateUser, Role, RoleActions, User};
use crate::error::ApiError;
use crate::utils::run_async_to_main;

/// User and role management, opened from the main window header.
struct AdminWindow {
    window: adw::Window,
    overlay: adw::ToastOverlay,
    client: Arc<ApiClient>,
    users: RefCell<Vec<User>>,
    visible_users: RefCell<Vec<User>>,
    roles: RefCell<Vec<Role>>,
    users_list: gtk::ListBox,
    roles_list: gtk::ListBox,
    user_filter: gtk::SearchEntry,
    on_unauthorized: Rc<dyn Fn()>,
}

pub fn show_admin_window(parent: &adw::ApplicationWindow, client: Arc<ApiClient>, on_unauthorized: Rc<dyn Fn()>) {
    let window = adw::Window::builder()
        .transient_for(parent)
        .title("Users & Roles")
        .default_width(720)
        .default_height(520)
        .build();
    let overlay = adw::ToastOverlay::new();

    let stack = adw::ViewStack::new();
    let switcher = adw::ViewSwitcher::builder()
        .stack(&stack)
        .policy(adw::ViewSwitcherPolicy::Wide)
        .build();
    let header = adw::HeaderBar::new();
    header.set_title_widget(Some(&switcher));

    // Users page
    let users_page = page_box();
    let users_bar = gtk::Box::new(gtk::Orientation::Horizontal, 6);
    let user_filter = gtk::SearchEntry::new();
    user_filter.set_placeholder_text(Some("Filter username…"));
    user_filter.set_hexpand(true);
    users_bar.append(&user_filter);
    let (user_refresh, user_add, user_edit, user_delete) = toolbar_buttons(&users_bar);
    users_page.append(&users_bar);
    let users_list = gtk::ListBox::new();
    users_page.append(&scrolled(&users_list));
    stack.add_titled(&users_page, Some("users"), "Users");

    // Roles page
    let roles_page = page_box();
    let roles_bar = gtk::Box::new(gtk::Orientation::Horizontal, 6);
    let spacer = gtk::Box::new(gtk::Orientation::Horizontal, 0);
    spacer.set_hexpand(true);
    roles_bar.append(&spacer);
    let (role_refresh, role_add, role_edit, role_delete) = toolbar_buttons(&roles_bar);
    roles_page.append(&roles_bar);
    let roles_list = gtk::ListBox::new();
    roles_page.append(&scrolled(&roles_list));
    stack.add_titled(&roles_page, Some("roles"), "Roles");

    overlay.set_child(Some(&stack));
    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    container.append(&header);
    container.append(&overlay);
    window.set_content(Some(&container));

    let admin = Rc::new(AdminWindow {
        window,
        overlay,
        client,
        users: RefCell::new(Vec::new()),
        visible_users: RefCell::new(Vec::new()),
        roles: RefCell::new(Vec::new()),
        users_list,
        roles_list,
        user_filter,
        on_unauthorized,
    });

    let weak = Rc::downgrade(&admin);
    let with_admin = move |f: fn(&Rc<AdminWindow>)| {
        let weak = weak.clone();
        move || {
            if let Some(admin) = weak.upgrade() {
                f(&admin);
            }
        }
    };
    {
        let on_change = with_admin(|admin| admin.render_users());
        admin.user_filter.connect_search_changed(move |_| on_change());
    }
    let bind = |button: &gtk::Button, f: fn(&Rc<AdminWindow>)| {
        let action = with_admin(f);
        button.connect_clicked(move |_| action());
    };
    bind(&user_refresh, |admin| admin.reload_users());
    bind(&user_add, |admin| admin.user_dialog(None));
    bind(&user_edit, |admin| match admin.selected_user() {
        Some(user) => admin.user_dialog(Some(user)),
        None => admin.toast("Select a user first."),
    });
    bind(&user_delete, |admin| admin.delete_selected_user());
    bind(&role_refresh, |admin| admin.reload_roles());
    bind(&role_add, |admin| admin.role_dialog(None));
    bind(&role_edit, |admin| match admin.selected_role() {
        Some(role) => admin.role_dialog(Some(role)),
        None => admin.toast("Select a role first."),
    });
    bind(&role_delete, |admin| admin.delete_selected_role());

    // Roles first so user rows can show role names.
    admin.reload_roles();
    admin.reload_users();
    admin.window.present();
}

fn page_box() -> gtk::Box {
    let page = gtk::Box::new(gtk::Orientation::Vertical, 8);
    page.set_margin_top(12);
    page.set_margin_bottom(12);
    page.set_margin_start(12);
    page.set_margin_end(12);
    page
}

fn scrolled(list: &gtk::ListBox) -> gtk::ScrolledWindow {
    list.set_selection_mode(gtk::SelectionMode::Single);
    let scroller = gtk::ScrolledWindow::builder().vexpand(true).hexpand(true).build();
    scroller.set_child(Some(list));
    scroller
}

fn toolbar_buttons(bar: &gtk::Box) -> (gtk::Button, gtk::Button, gtk::Button, gtk::Button) {
    let refresh = gtk::Button::from_icon_name("view-refresh-symbolic");
    refresh.set_tooltip_text(Some("Refresh"));
    let add = gtk::Button::with_label("Add");
    add.add_css_class("suggested-action");
    let edit = gtk::Button::with_label("Edit");
    let delete = gtk::Button::with_label("Delete");
    delete.add_css_class("destructive-action");
    for button in [&refresh, &add, &edit, &delete] {
        bar.append(button);
    }
    (refresh, add, edit, delete)
}

fn two_line_row(title: &str, subtitle: &str) -> gtk::ListBoxRow {
    let row = gtk::ListBoxRow::new();
    let line = gtk::Box::new(gtk::Orientation::Vertical, 2);
    line.set_margin_top(6);
    line.set_margin_bottom(6);
    line.set_margin_start(8);
    line.set_margin_end(8);
    let title = gtk::Label::new(Some(title));
    title.set_halign(gtk::Align::Start);
    line.append(&title);
    let sub = gtk::Label::new(Some(subtitle));
    sub.add_css_class("dim-label");
    sub.set_halign(gtk::Align::Start);
    line.append(&sub);
    row.set_child(Some(&line));
    row
}

fn clear_list(list: &gtk::ListBox) {
    while let Some(child) = list.first_child() {
        list.remove(&child);
    }
}

fn labeled_entry(content: &gtk::Box, placeholder: &str, value: &str) -> gtk::Entry {
    let entry = gtk::Entry::new();
    entry.set_placeholder_text(Some(placeholder));
    entry.set_text(value);
    entry.set_hexpand(true);
    content.append(&entry);
    entry
}

fn optional_text(entry: &gtk::Entry) -> Option<String> {
    let text = entry.text().trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn form_dialog(parent: &adw::Window, title: &str, confirm: &str) -> (gtk::Dialog, gtk::Box) {
    let dialog = gtk::Dialog::builder()
        .title(title)
        .transient_for(parent)
        .modal(true)
        .build();
    let content = gtk::Box::new(gtk::Orientation::Vertical, 12);
    content.set_margin_top(12);
    content.set_margin_bottom(12);
    content.set_margin_start(12);
    content.set_margin_end(12);
    dialog.set_child(Some(&content));
    let _ = dialog.add_button("Cancel", gtk::ResponseType::Cancel);
    let ok_btn = dialog.add_button(confirm, gtk::ResponseType::Ok);
    ok_btn.add_css_class("suggested-action");
    dialog.set_default_response(gtk::ResponseType::Ok);
    (dialog, content)
}

impl AdminWindow {
    fn toast(&self, msg: &str) {
        self.overlay.add_toast(adw::Toast::new(msg));
    }

    fn report(&self, what: &str, err: ApiError) {
        if err.is_unauthorized() {
            self.window.close();
            (self.on_unauthorized)();
            return;
        }
        error!("{what}: {err}");
        self.toast(&format!("{what}: {err}"));
    }

    fn reload_users(self: &Rc<Self>) {
        let client = self.client.clone();
        let admin = self.clone();
        run_async_to_main(async move { client.users().await }, move |res| match res {
            Ok(users) => {
                *admin.users.borrow_mut() = users;
                admin.render_users();
            }
            Err(e) => admin.report("Failed to load users", e),
        });
    }

    fn reload_roles(self: &Rc<Self>) {
        let client = self.client.clone();
        let admin = self.clone();
        run_async_to_main(async move { client.roles().await }, move |res| match res {
            Ok(roles) => {
                *admin.roles.borrow_mut() = roles;
                admin.render_roles();
                admin.render_users();
            }
            Err(e) => admin.report("Failed to load roles", e),
        });
    }

    fn render_users(&self) {
        clear_list(&self.users_list);
        let query = self.user_filter.text().trim().to_lowercase();
        let visible: Vec<User> = self
            .users
            .borrow()
            .iter()
            .filter(|u| query.is_empty() || u.username.to_lowercase().contains(&query))
            .cloned()
            .collect();
        let roles = self.roles.borrow();
        for user in &visible {
            let role = user
                .role_id
                .and_then(|id| roles.iter().find(|r| r.id == Some(id)))
                .map(|r| r.name.as_str())
                .unwrap_or("no role");
            let mut sub = format!("{} · {}", user.username, role);
            if let Some(email) = user.email.as_deref().filter(|e| !e.is_empty()) {
                sub.push_str(" · ");
                sub.push_str(email);
            }
            self.users_list.append(&two_line_row(&user.name, &sub));
        }
        *self.visible_users.borrow_mut() = visible;
    }

    fn render_roles(&self) {
        clear_list(&self.roles_list);
        for role in self.roles.borrow().iter() {
            let granted: Vec<&str> = role
                .menu_actions()
                .unwrap_or_default()
                .flags()
                .iter()
                .filter(|(_, on)| *on)
                .map(|(label, _)| *label)
                .collect();
            let sub = if granted.is_empty() { "no menus".to_string() } else { granted.join(", ") };
            self.roles_list.append(&two_line_row(&role.name, &sub));
        }
    }

    fn selected_user(&self) -> Option<User> {
        let row = self.users_list.selected_row()?;
        let idx = usize::try_from(row.index()).ok()?;
        self.visible_users.borrow().get(idx).cloned()
    }

    fn selected_role(&self) -> Option<Role> {
        let row = self.roles_list.selected_row()?;
        let idx = usize::try_from(row.index()).ok()?;
        self.roles.borrow().get(idx).cloned()
    }

    fn user_dialog(self: &Rc<Self>, existing: Option<User>) {
        let creating = existing.is_none();
        let initial = existing.as_ref().map(CreateUser::from).unwrap_or_default();
        let (dialog, content) = form_dialog(
            &self.window,
            if creating { "New User" } else { "Edit User" },
            if creating { "Create" } else { "Update" },
        );

        let name = labeled_entry(&content, "Name", &initial.name);
        let username = labeled_entry(&content, "Username", &initial.username);
        let password = gtk::PasswordEntry::new();
        password.set_placeholder_text(Some(if creating { "Password" } else { "New password (optional)" }));
        content.append(&password);
        let email = labeled_entry(&content, "Email", initial.email.as_deref().unwrap_or_default());
        let whatsapp = labeled_entry(&content, "WhatsApp number", initial.whatsapp.as_deref().unwrap_or_default());

        let roles = self.roles.borrow().clone();
        let mut names = vec!["No role".to_string()];
        names.extend(roles.iter().map(|r| r.name.clone()));
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let role_pick = gtk::DropDown::from_strings(&refs);
        let current = initial
            .role_id
            .and_then(|id| roles.iter().position(|r| r.id == Some(id)))
            .map_or(0, |pos| pos + 1);
        role_pick.set_selected(current as u32);
        content.append(&role_pick);

        let confirmed = gtk::CheckButton::with_label("Confirmed");
        confirmed.set_active(initial.confirmed.unwrap_or(false));
        content.append(&confirmed);

        let id = existing.and_then(|u| u.id);
        let admin = self.clone();
        dialog.connect_response(move |dlg, resp| {
            if resp != gtk::ResponseType::Ok {
                dlg.close();
                return;
            }
            let role_id = (role_pick.selected() as usize)
                .checked_sub(1)
                .and_then(|idx| roles.get(idx))
                .and_then(|r| r.id);
            let form = CreateUser {
                name: name.text().trim().to_string(),
                username: username.text().trim().to_string(),
                password: password.text().to_string(),
                confirmed: Some(confirmed.is_active()),
                whatsapp: optional_text(&whatsapp),
                email: optional_text(&email),
                role_id,
            };
            if let Err(msg) = form.validate(creating) {
                admin.toast(&msg);
                return;
            }
            let client = admin.client.clone();
            let admin = admin.clone();
            run_async_to_main(
                async move {
                    match id {
                        Some(id) => client.update_user(id, &form).await,
                        None => client.create_user(&form).await,
                    }
                },
                move |res| match res {
                    Ok(()) => {
                        info!("User saved");
                        admin.reload_users();
                    }
                    Err(e) => admin.report("Failed to save user", e),
                },
            );
            dlg.close();
        });
        dialog.present();
    }

    fn role_dialog(self: &Rc<Self>, existing: Option<Role>) {
        let creating = existing.is_none();
        let initial = existing.as_ref().map(CreateRole::from).unwrap_or_default();
        let (dialog, content) = form_dialog(
            &self.window,
            if creating { "New Role" } else { "Edit Role" },
            if creating { "Create" } else { "Update" },
        );

        let name = labeled_entry(&content, "Name", &initial.name);
        let checks: Vec<gtk::CheckButton> = initial
            .actions
            .unwrap_or_default()
            .flags()
            .iter()
            .map(|(label, on)| {
                let check = gtk::CheckButton::with_label(label);
                check.set_active(*on);
                content.append(&check);
                check
            })
            .collect();

        let id = existing.and_then(|r| r.id);
        let admin = self.clone();
        dialog.connect_response(move |dlg, resp| {
            if resp != gtk::ResponseType::Ok {
                dlg.close();
                return;
            }
            let mut actions = RoleActions::default();
            for (idx, check) in checks.iter().enumerate() {
                actions.set_flag(idx, check.is_active());
            }
            let form = CreateRole { name: name.text().trim().to_string(), actions: Some(actions) };
            if let Err(msg) = form.validate() {
                admin.toast(&msg);
                return;
            }
            let client = admin.client.clone();
            let admin = admin.clone();
            run_async_to_main(
                async move {
                    match id {
                        Some(id) => client.update_role(id, &form).await,
                        None => client.create_role(&form).await,
                    }
                },
                move |res| match res {
                    Ok(()) => admin.reload_roles(),
                    Err(e) => admin.report("Failed to save role", e),
                },
            );
            dlg.close();
        });
        dialog.present();
    }

    fn delete_selected_user(self: &Rc<Self>) {
        let Some(id) = self.selected_user().and_then(|u| u.id) else {
            self.toast("Select a user first.");
            return;
        };
        let client = self.client.clone();
        let admin = self.clone();
        run_async_to_main(async move { client.delete_user(id).await }, move |res| match res {
            Ok(()) => admin.reload_users(),
            Err(e) => admin.report("Failed to delete user", e),
        });
    }

    fn delete_selected_role(self: &Rc<Self>) {
        let Some(id) = self.selected_role().and_then(|r| r.id) else {
            self.toast("Select a role first.");
            return;
        };
        let client = self.client.clone();
        let admin = self.clone();
        run_async_to_main(async move { client.delete_role(id).await }, move |res| match res {
            Ok(()) => admin.reload_roles(),
            Err(e) => admin.report("Failed to delete role", e),
        });
    }
}
