//! System tray icon via D-Bus StatusNotifier (ksni)
//!
//! The tray only exposes a Quit item. Clicking it cancels the process-wide
//! token; the orchestrator in `app` observes the token and tears everything
//! down.

use anyhow::{Context, Result, anyhow};
use ksni::TrayMethods;
use std::io::Cursor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::constants::app;

pub struct ReceiverTray {
    quit: CancellationToken,
    icon: Option<ksni::Icon>,
}

impl ReceiverTray {
    pub fn new(quit: CancellationToken) -> Self {
        let icon = load_tray_icon()
            .inspect_err(|err| warn!(error = %format!("{err:#}"), "Failed to load tray icon, using theme icon"))
            .ok();
        Self { quit, icon }
    }
}

impl ksni::Tray for ReceiverTray {
    fn id(&self) -> String {
        app::TRAY_ID.to_string()
    }

    fn title(&self) -> String {
        app::DISPLAY_NAME.to_string()
    }

    fn icon_name(&self) -> String {
        if self.icon.is_some() {
            String::new()
        } else {
            app::FALLBACK_ICON_NAME.to_string()
        }
    }

    fn icon_pixmap(&self) -> Vec<ksni::Icon> {
        self.icon.iter().cloned().collect()
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        ksni::ToolTip {
            title: app::DISPLAY_NAME.to_string(),
            ..Default::default()
        }
    }

    fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
        vec![
            ksni::menu::StandardItem {
                label: "Quit".into(),
                icon_name: "application-exit".into(),
                activate: Box::new(|this: &mut Self| {
                    info!("Quit requested from tray menu");
                    this.quit.cancel();
                }),
                ..Default::default()
            }
            .into(),
        ]
    }
}

/// Register the tray with the session's StatusNotifierWatcher
pub async fn spawn(quit: CancellationToken) -> Result<ksni::Handle<ReceiverTray>> {
    let handle = ReceiverTray::new(quit)
        .spawn()
        .await
        .context("Failed to register tray icon")?;
    info!("Tray icon created");
    Ok(handle)
}

/// Decode the embedded PNG into ksni's ARGB32 pixmap
fn load_tray_icon() -> Result<ksni::Icon> {
    let icon_bytes = include_bytes!("../assets/tray-icon.png");
    let mut decoder = png::Decoder::new(Cursor::new(&icon_bytes[..]));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder.read_info()?;

    // 8-bit output after normalization, at most four channels
    let (width, height) = (reader.info().width, reader.info().height);
    let mut buf = vec![0; width as usize * height as usize * 4];
    let info = reader.next_frame(&mut buf)?;
    let pixels = &buf[..info.buffer_size()];

    // StatusNotifier wants ARGB in network byte order
    let data = match info.color_type {
        png::ColorType::Rgba => pixels
            .chunks_exact(4)
            .flat_map(|px| [px[3], px[0], px[1], px[2]])
            .collect(),
        png::ColorType::Rgb => pixels
            .chunks_exact(3)
            .flat_map(|px| [0xFF, px[0], px[1], px[2]])
            .collect(),
        other => {
            return Err(anyhow!(
                "Unsupported tray icon color type {:?} (expected RGB or RGBA)",
                other
            ));
        }
    };

    Ok(ksni::Icon {
        width: i32::try_from(info.width)?,
        height: i32::try_from(info.height)?,
        data,
    })
}
