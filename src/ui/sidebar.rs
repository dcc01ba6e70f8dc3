use std::cell::RefCell;
use std::rc::Rc;

use gtk4::prelude::*;
use gtk4 as gtk;

use crate::api::models::Sender;

pub struct Sidebar {
    root: gtk::Box,
    list: gtk::ListBox,
    senders: Rc<RefCell<Vec<Sender>>>,
}

impl Sidebar {
    pub fn new() -> Self {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 6);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);
        root.set_width_request(220);

        let title = gtk::Label::new(Some("Senders"));
        title.add_css_class("heading");
        title.set_halign(gtk::Align::Start);
        root.append(&title);

        let list = gtk::ListBox::new();
        list.set_selection_mode(gtk::SelectionMode::Single);
        let scroller = gtk::ScrolledWindow::builder().vexpand(true).build();
        scroller.set_child(Some(&list));
        root.append(&scroller);

        Self { root, list, senders: Rc::new(RefCell::new(Vec::new())) }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    /// Calls `f` with the sender behind the row the user picks.
    pub fn connect_selected<F: Fn(Sender) + 'static>(&self, f: F) {
        let senders = self.senders.clone();
        self.list.connect_row_selected(move |_, row| {
            let Some(row) = row else { return };
            let picked = usize::try_from(row.index())
                .ok()
                .and_then(|idx| senders.borrow().get(idx).cloned());
            if let Some(sender) = picked {
                f(sender);
            }
        });
    }

    pub fn set_items(&self, items: Vec<Sender>) {
        // Replace the model before touching rows; removing the selected row
        // fires row-selected with `None`.
        *self.senders.borrow_mut() = items.clone();
        while let Some(child) = self.list.first_child() {
            self.list.remove(&child);
        }
        for sender in items {
            let row = gtk::ListBoxRow::new();
            let label = gtk::Label::new(Some(&sender.name));
            label.set_margin_top(8);
            label.set_margin_bottom(8);
            label.set_margin_start(8);
            label.set_margin_end(8);
            label.set_halign(gtk::Align::Start);
            if !sender.is_connected() {
                label.add_css_class("dim-label");
            }
            row.set_child(Some(&label));
            self.list.append(&row);
        }
    }
}
