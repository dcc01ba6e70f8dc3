use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

pub fn spawn_async<F>(fut: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    RUNTIME.spawn(fut);
}

/// Runs `fut` on the tokio runtime and hands its output to `on_done` on the
/// GTK main loop.
#[cfg(feature = "gui")]
pub fn run_async_to_main<T, Fut, F>(fut: Fut, on_done: F)
where
    T: Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    F: FnOnce(T) + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel::<T>();
    spawn_async(async move {
        let _ = tx.send(fut.await);
    });
    glib::MainContext::default().spawn_local(async move {
        if let Ok(res) = rx.await {
            on_done(res);
        }
    });
}

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Image bytes of a `data:image/png;base64,...` QR payload. Bare base64 is accepted too.
pub fn decode_data_url(payload: &str) -> Option<Vec<u8>> {
    let encoded = match payload.split_once(',') {
        Some((header, data)) if header.starts_with("data:") && header.ends_with(";base64") => data,
        Some(_) => return None,
        None => payload,
    };
    if encoded.trim().is_empty() {
        return None;
    }
    STANDARD.decode(encoded.trim()).ok()
}
