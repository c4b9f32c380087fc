//! PipView - live picture-in-picture preview of any window or screen region

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

#[cfg_attr(not(windows), allow(dead_code))]
mod state;
#[cfg(windows)]
mod ui;

#[cfg(windows)]
fn main() -> anyhow::Result<()> {
    use eframe::egui;
    use windows::Win32::UI::HiDpi::{
        SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Physical pixels everywhere, so window rects match what GDI copies
    unsafe {
        let _ = SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2);
    }

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([460.0, 200.0])
            .with_min_inner_size([120.0, 80.0])
            .with_title(ui::APP_NAME)
            .with_resizable(true),
        ..Default::default()
    };

    log::info!("starting {}", ui::APP_NAME);
    eframe::run_native(
        ui::APP_NAME,
        native_options,
        Box::new(|cc| Ok(Box::new(ui::PipApp::new(cc)))),
    )
    .map_err(|e| anyhow::anyhow!("failed to run the UI: {}", e))?;

    Ok(())
}

#[cfg(not(windows))]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    anyhow::bail!("PipView needs Windows to capture windows")
}
