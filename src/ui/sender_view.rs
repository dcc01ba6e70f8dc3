use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use gtk4 as gtk;
use gtk4::gdk_pixbuf::prelude::*;
use gtk4::prelude::*;
use log::{error, warn};

use crate::api::client::ApiClient;
use crate::api::models::{Contact, Sender};
use crate::contacts::{filter_contacts, phone_from_jid};
use crate::error::ApiError;
use crate::pairing::{PairingController, PairingSnapshot, PairingStatus};

/// Detail pane of one sender: info, pairing status, QR code and contacts.
pub struct SenderView {
    root: gtk::Box,
    title: gtk::Label,
    details: gtk::Label,
    status: gtk::Label,
    qr: gtk::Picture,
    filter: gtk::SearchEntry,
    contacts_list: gtk::ListBox,
    contacts: RefCell<Vec<Contact>>,
    visible_contacts: RefCell<Vec<Contact>>,
    avatar: gtk::Picture,
    avatar_caption: gtk::Label,
    /// Jid whose avatar is wanted; late answers for other contacts are dropped.
    avatar_jid: RefCell<String>,
    sender: RefCell<Option<Sender>>,
    client: Arc<ApiClient>,
    pairing: PairingController<ApiClient>,
    on_unauthorized: Rc<dyn Fn()>,
}

impl SenderView {
    pub fn new(client: Arc<ApiClient>, on_unauthorized: Rc<dyn Fn()>) -> Rc<Self> {
        let root = gtk::Box::new(gtk::Orientation::Horizontal, 12);
        root.set_margin_top(12);
        root.set_margin_bottom(12);
        root.set_margin_start(12);
        root.set_margin_end(12);

        // Contacts column
        let contacts_col = gtk::Box::new(gtk::Orientation::Vertical, 6);
        contacts_col.set_hexpand(true);
        let contacts_title = gtk::Label::new(Some("Contacts"));
        contacts_title.add_css_class("heading");
        contacts_title.set_halign(gtk::Align::Start);
        contacts_col.append(&contacts_title);

        let filter = gtk::SearchEntry::new();
        filter.set_placeholder_text(Some("Filter name…"));
        contacts_col.append(&filter);

        let scroller = gtk::ScrolledWindow::builder().vexpand(true).hexpand(true).build();
        let contacts_list = gtk::ListBox::new();
        scroller.set_child(Some(&contacts_list));
        contacts_col.append(&scroller);
        root.append(&contacts_col);

        // Info + pairing column
        let info_col = gtk::Box::new(gtk::Orientation::Vertical, 8);
        info_col.set_width_request(300);

        let title = gtk::Label::new(Some("Select a sender"));
        title.add_css_class("title-2");
        title.set_halign(gtk::Align::Start);
        info_col.append(&title);

        let details = gtk::Label::new(None);
        details.add_css_class("dim-label");
        details.set_halign(gtk::Align::Start);
        details.set_selectable(true);
        info_col.append(&details);

        let status = gtk::Label::new(None);
        status.set_halign(gtk::Align::Start);
        info_col.append(&status);

        let qr = gtk::Picture::new();
        qr.set_size_request(256, 256);
        qr.set_can_shrink(true);
        qr.set_visible(false);
        info_col.append(&qr);

        let avatar = gtk::Picture::new();
        avatar.set_size_request(96, 96);
        avatar.set_can_shrink(true);
        avatar.set_halign(gtk::Align::Start);
        avatar.set_visible(false);
        info_col.append(&avatar);

        let avatar_caption = gtk::Label::new(None);
        avatar_caption.add_css_class("dim-label");
        avatar_caption.set_halign(gtk::Align::Start);
        info_col.append(&avatar_caption);

        let refresh_btn = gtk::Button::with_label("Refresh");
        refresh_btn.set_halign(gtk::Align::End);
        info_col.append(&refresh_btn);
        root.append(&info_col);

        let pairing = PairingController::new(client.clone());
        let view = Rc::new(Self {
            root,
            title,
            details,
            status,
            qr,
            filter,
            contacts_list,
            contacts: RefCell::new(Vec::new()),
            visible_contacts: RefCell::new(Vec::new()),
            avatar,
            avatar_caption,
            avatar_jid: RefCell::new(String::new()),
            sender: RefCell::new(None),
            client,
            pairing,
            on_unauthorized,
        });

        // Pairing snapshots are applied on the main loop
        {
            let mut updates = view.pairing.subscribe();
            let weak = Rc::downgrade(&view);
            glib::MainContext::default().spawn_local(async move {
                while updates.changed().await.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    let Some(view) = weak.upgrade() else { break };
                    view.apply(&snapshot);
                }
            });
        }

        {
            let weak = Rc::downgrade(&view);
            view.filter.connect_search_changed(move |_| {
                if let Some(view) = weak.upgrade() {
                    view.rebuild_contacts();
                }
            });
        }

        {
            let weak = Rc::downgrade(&view);
            view.contacts_list.connect_row_activated(move |_, row| {
                let Some(view) = weak.upgrade() else { return };
                let picked = usize::try_from(row.index())
                    .ok()
                    .and_then(|idx| view.visible_contacts.borrow().get(idx).cloned());
                if let Some(contact) = picked {
                    view.show_avatar(&contact);
                }
            });
        }

        {
            let weak = Rc::downgrade(&view);
            refresh_btn.connect_clicked(move |_| {
                if let Some(view) = weak.upgrade() {
                    view.refresh();
                }
            });
        }

        view
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    pub fn current_sender(&self) -> Option<Sender> {
        self.sender.borrow().clone()
    }

    /// Switches to `sender`. The new attempt replaces the previous one before
    /// this returns; only its initial status query runs in the background.
    pub fn show_sender(&self, sender: Sender) {
        let attempt = self.pairing.start(&sender.token);
        self.hide_avatar();
        self.contacts.borrow_mut().clear();
        self.rebuild_contacts();

        self.title.set_label(&sender.name);
        let jid = if sender.jid.is_empty() { "not paired" } else { sender.jid.as_str() };
        let expiration = sender
            .expiration
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "never".into());
        self.details.set_label(&format!(
            "ID: {}\nJID: {}\nLast known: {}\nExpires: {}",
            sender.id.map(|id| id.to_string()).unwrap_or_default(),
            jid,
            if sender.is_connected() { "connected" } else { "disconnected" },
            expiration,
        ));

        *self.sender.borrow_mut() = Some(sender);
        crate::utils::spawn_async(attempt);
    }

    /// Reloads the sender from the backend and restarts pairing.
    pub fn refresh(self: &Rc<Self>) {
        let Some(id) = self.sender.borrow().as_ref().and_then(|s| s.id) else { return };
        let client = self.client.clone();
        let weak = Rc::downgrade(self);
        crate::utils::run_async_to_main(async move { client.sender(id).await }, move |res| {
            let Some(view) = weak.upgrade() else { return };
            match res {
                Ok(sender) => view.show_sender(sender),
                Err(e) if e.is_unauthorized() => (view.on_unauthorized)(),
                Err(e) => {
                    error!("Failed to reload sender {id}: {e}");
                    view.status.set_label(&format!("Failed to reload sender: {e}"));
                }
            }
        });
    }

    pub fn clear(&self) {
        self.pairing.teardown();
        *self.sender.borrow_mut() = None;
        self.hide_avatar();
        self.title.set_label("Select a sender");
        self.details.set_label("");
        self.contacts.borrow_mut().clear();
        self.rebuild_contacts();
    }

    pub fn teardown(&self) {
        self.pairing.teardown();
    }

    fn apply(&self, snapshot: &PairingSnapshot) {
        self.status.set_label(snapshot.status.label());

        if snapshot.qrcode.is_empty() || snapshot.status.is_terminal() {
            self.qr.set_visible(false);
        } else {
            self.show_qr(&snapshot.qrcode);
        }

        if *self.contacts.borrow() != snapshot.contacts {
            *self.contacts.borrow_mut() = snapshot.contacts.clone();
            self.rebuild_contacts();
        }

        if snapshot.status == PairingStatus::BadAuthentication {
            warn!("Sender token rejected, returning to login");
            (self.on_unauthorized)();
        }
    }

    fn show_qr(&self, payload: &str) {
        let Some(bytes) = crate::utils::decode_data_url(payload) else {
            warn!("QR payload is not a base64 image");
            self.qr.set_visible(false);
            return;
        };
        let shown = load_picture(&self.qr, &bytes);
        self.qr.set_visible(shown);
    }

    fn hide_avatar(&self) {
        self.avatar_jid.borrow_mut().clear();
        self.avatar.set_visible(false);
        self.avatar_caption.set_label("");
    }

    /// Fetches the profile picture of `contact` through the sender's session.
    fn show_avatar(self: &Rc<Self>, contact: &Contact) {
        let Some(token) = self.sender.borrow().as_ref().map(|s| s.token.clone()) else { return };
        *self.avatar_jid.borrow_mut() = contact.jid.clone();
        self.avatar.set_visible(false);
        self.avatar_caption.set_label(&contact.display_name());

        let client = self.client.clone();
        let jid = contact.jid.clone();
        let weak = Rc::downgrade(self);
        crate::utils::run_async_to_main(
            async move {
                let avatar = client.avatar(&token, &jid).await?;
                if avatar.url.is_empty() {
                    return Ok::<_, ApiError>((jid, None));
                }
                let bytes = client.image(&avatar.url).await?;
                Ok((jid, Some(bytes)))
            },
            move |res| {
                let Some(view) = weak.upgrade() else { return };
                match res {
                    Ok((jid, bytes)) if *view.avatar_jid.borrow() == jid => {
                        let shown = bytes.is_some_and(|bytes| load_picture(&view.avatar, &bytes));
                        view.avatar.set_visible(shown);
                    }
                    Ok(_) => {}
                    Err(e) if e.is_unauthorized() => (view.on_unauthorized)(),
                    Err(e) => warn!("Failed to load avatar: {e}"),
                }
            },
        );
    }

    fn rebuild_contacts(&self) {
        while let Some(child) = self.contacts_list.first_child() {
            self.contacts_list.remove(&child);
        }
        let contacts = self.contacts.borrow();
        let query = self.filter.text();
        let visible = filter_contacts(&contacts, query.as_str());
        *self.visible_contacts.borrow_mut() = visible.iter().map(|c| (*c).clone()).collect();
        for contact in visible {
            let row = gtk::ListBoxRow::new();
            let line = gtk::Box::new(gtk::Orientation::Vertical, 2);
            line.set_margin_top(6);
            line.set_margin_bottom(6);
            line.set_margin_start(8);
            line.set_margin_end(8);

            let name = gtk::Label::new(Some(&contact.display_name()));
            name.set_halign(gtk::Align::Start);
            line.append(&name);

            let phone = phone_from_jid(&contact.jid).unwrap_or_else(|| contact.jid.clone());
            let sub = if contact.business_name.is_empty() {
                phone
            } else {
                format!("{phone} · {}", contact.business_name)
            };
            let sub = gtk::Label::new(Some(&sub));
            sub.add_css_class("dim-label");
            sub.set_halign(gtk::Align::Start);
            line.append(&sub);

            if !contact.found {
                row.set_sensitive(false);
            }
            row.set_child(Some(&line));
            self.contacts_list.append(&row);
        }
    }
}

/// Decodes an encoded image into `picture`. Returns whether it could be shown.
fn load_picture(picture: &gtk::Picture, bytes: &[u8]) -> bool {
    let loader = gtk::gdk_pixbuf::PixbufLoader::new();
    let loaded = loader.write(bytes).and_then(|_| loader.close());
    match (loaded, loader.pixbuf()) {
        (Ok(()), Some(pixbuf)) => {
            picture.set_pixbuf(Some(&pixbuf));
            true
        }
        (Err(e), _) => {
            error!("Failed to decode image: {e}");
            false
        }
        (Ok(()), None) => false,
    }
}
