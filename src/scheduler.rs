use crate::app_state::AppState;
use actix_web::web;

/// Periodically drop expired cache entries so they do not linger unread
pub fn spawn(data: web::Data<AppState>) {
    let interval = data.config.cache.sweep_interval();
    actix_web::rt::spawn(async move {
        loop {
            // sleep between sweeps
            actix_web::rt::time::sleep(interval).await;

            let purged = data.cache.purge_expired();
            if purged > 0 {
                log::info!(
                    "Cache sweep removed {} expired entries ({} remain)",
                    purged,
                    data.cache.len()
                );
            }
        }
    });
}
