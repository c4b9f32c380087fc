//! Picker and picture-in-picture preview built on egui

use crate::state::{initial_preview_size, AppState, StateMachine};
use capture::{
    latest_frame, CaptureConfig, CaptureLoop, CaptureTarget, Frame, GdiPlatform, Grabber,
    LatestFrame, StopReason,
};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use eframe::egui;
use egui::viewport::{ResizeDirection, WindowLevel};
use egui::ViewportCommand;
use overlay::selection::selection_target;
use overlay::{
    enumerate_windows, OverlayError, OverlayResult, OverlayWindow, SelectionOutcome, WindowInfo,
};
use std::thread;
use std::time::Duration;
use windows::Win32::Foundation::HWND;
use windows::Win32::UI::WindowsAndMessaging::{SetForegroundWindow, ShowWindow, SW_HIDE, SW_SHOW};

pub const APP_NAME: &str = "PipView";

const PICKER_SIZE: [f32; 2] = [460.0, 200.0];
const GRIP_SIZE: f32 = 16.0;

/// Live preview of one capture target
struct Preview {
    capture: CaptureLoop,
    frames: LatestFrame,
    texture: Option<egui::TextureHandle>,
}

/// Main application
pub struct PipApp {
    state_machine: StateMachine,
    windows: Vec<WindowInfo>,
    selected: Option<usize>,
    preview: Option<Preview>,
    selection_rx: Option<Receiver<OverlayResult<SelectionOutcome>>>,
    main_hwnd: isize,
    status_text: String,
}

impl PipApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let mut app = Self {
            state_machine: StateMachine::new(),
            windows: Vec::new(),
            selected: None,
            preview: None,
            selection_rx: None,
            main_hwnd: 0,
            status_text: AppState::Picking.display_text().to_string(),
        };
        app.refresh_windows();
        app
    }

    fn refresh_windows(&mut self) {
        let previous = self.selected.and_then(|i| self.windows.get(i)).map(|w| w.hwnd);
        self.windows = enumerate_windows(APP_NAME);
        self.selected = previous.and_then(|hwnd| self.windows.iter().position(|w| w.hwnd == hwnd));
    }

    fn set_main_window_visible(&self, visible: bool) {
        if self.main_hwnd == 0 {
            return;
        }
        let hwnd = HWND(self.main_hwnd as *mut std::ffi::c_void);
        unsafe {
            let _ = ShowWindow(hwnd, if visible { SW_SHOW } else { SW_HIDE });
            if visible {
                let _ = SetForegroundWindow(hwnd);
            }
        }
    }

    fn begin_region_selection(&mut self, ctx: &egui::Context) {
        if !self.state_machine.start_selecting() {
            return;
        }
        self.status_text = AppState::Selecting.display_text().to_string();
        self.set_main_window_visible(false);

        let (tx, rx) = bounded(1);
        self.selection_rx = Some(rx);

        let ctx = ctx.clone();
        let main_hwnd = self.main_hwnd;
        thread::spawn(move || {
            // Let the main window disappear before the desktop is captured
            thread::sleep(Duration::from_millis(100));
            let _ = tx.send(OverlayWindow::show());

            if main_hwnd != 0 {
                let hwnd = HWND(main_hwnd as *mut std::ffi::c_void);
                unsafe {
                    let _ = ShowWindow(hwnd, SW_SHOW);
                }
            }
            ctx.request_repaint();
        });
    }

    fn poll_selection(&mut self, ctx: &egui::Context) {
        let Some(rx) = self.selection_rx.as_ref() else {
            return;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(OverlayError::Cancelled),
        };
        self.selection_rx = None;
        self.set_main_window_visible(true);

        match result {
            Ok(SelectionOutcome::Region(rect)) => match selection_target(&rect) {
                Some(target) => self.start_preview(ctx, target, None),
                None => {
                    self.state_machine.cancel_selecting();
                    self.status_text = "Selection too small".to_string();
                }
            },
            Ok(SelectionOutcome::Cancelled) | Err(OverlayError::Cancelled) => {
                self.state_machine.cancel_selecting();
                self.status_text = "Cancelled".to_string();
            }
            Err(e) => {
                log::warn!("region selection failed: {}", e);
                self.state_machine.cancel_selecting();
                self.status_text = format!("Selection failed: {}", e);
            }
        }
    }

    fn start_preview(&mut self, ctx: &egui::Context, target: CaptureTarget, window: Option<&WindowInfo>) {
        let repaint_ctx = ctx.clone();
        let (sender, frames) = latest_frame(move || repaint_ctx.request_repaint());

        let capture = match CaptureLoop::start(
            Grabber::new(GdiPlatform::new()),
            target,
            CaptureConfig::default(),
            sender,
        ) {
            Ok(capture) => capture,
            Err(e) => {
                log::error!("failed to start capture: {}", e);
                self.state_machine.reset();
                self.status_text = format!("Error: {}", e);
                return;
            }
        };

        if !self.state_machine.start_preview(target) {
            return;
        }
        self.preview = Some(Preview {
            capture,
            frames,
            texture: None,
        });

        let (width, height) = initial_preview_size(&target, window.map(|w| w.rect));
        let ppp = ctx.pixels_per_point();
        ctx.send_viewport_cmd(ViewportCommand::Decorations(false));
        ctx.send_viewport_cmd(ViewportCommand::WindowLevel(WindowLevel::AlwaysOnTop));
        ctx.send_viewport_cmd(ViewportCommand::InnerSize(egui::vec2(
            width as f32 / ppp,
            height as f32 / ppp,
        )));
    }

    /// Tear down the preview and return to the picker
    fn reset_to_picker(&mut self, ctx: &egui::Context) {
        if let Some(preview) = self.preview.take() {
            preview.capture.stop();
            let stats = preview.capture.stats();
            log::info!(
                "leaving preview of {:?}: {} frames, {} skipped by the display, {} failed ticks",
                self.state_machine.target(),
                stats.frames_delivered,
                preview.frames.dropped(),
                stats.failed_ticks
            );
        }
        self.state_machine.reset();
        self.status_text = AppState::Picking.display_text().to_string();
        self.refresh_windows();

        ctx.send_viewport_cmd(ViewportCommand::Decorations(true));
        ctx.send_viewport_cmd(ViewportCommand::WindowLevel(WindowLevel::Normal));
        ctx.send_viewport_cmd(ViewportCommand::InnerSize(PICKER_SIZE.into()));
    }

    fn show_picker(&mut self, ctx: &egui::Context) {
        let app_state = self.state_machine.state();
        let mut start_window = None;
        let mut select_area = false;
        let mut refresh = false;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(8.0);
            ui.label("Pick a window to preview (covered windows work too):");
            ui.add_space(4.0);

            let selected_text = self
                .selected
                .and_then(|i| self.windows.get(i))
                .map(|w| w.title.clone())
                .unwrap_or_else(|| "Choose a window...".to_string());

            egui::ComboBox::from_id_source("window_picker")
                .selected_text(selected_text)
                .width(ui.available_width())
                .show_ui(ui, |ui| {
                    for (i, window) in self.windows.iter().enumerate() {
                        ui.selectable_value(&mut self.selected, Some(i), &window.title);
                    }
                });

            ui.add_space(10.0);
            ui.horizontal(|ui| {
                let can_start = app_state.can_select() && self.selected.is_some();
                if ui
                    .add_enabled(can_start, egui::Button::new("Start Capture").min_size(egui::vec2(140.0, 32.0)))
                    .clicked()
                {
                    start_window = self.selected.and_then(|i| self.windows.get(i)).cloned();
                }

                if ui
                    .add_enabled(
                        app_state.can_select(),
                        egui::Button::new("Select Area Manually").min_size(egui::vec2(160.0, 32.0)),
                    )
                    .clicked()
                {
                    select_area = true;
                }
            });

            ui.add_space(6.0);
            if ui.button("Refresh List").clicked() {
                refresh = true;
            }

            ui.add_space(6.0);
            ui.label(
                egui::RichText::new(&self.status_text)
                    .size(12.0)
                    .color(egui::Color32::from_rgb(136, 136, 136)),
            );
        });

        if refresh {
            self.refresh_windows();
        }
        if let Some(window) = start_window {
            self.start_preview(ctx, window.target(), Some(&window));
        } else if select_area {
            self.begin_region_selection(ctx);
        }
    }

    fn show_preview(&mut self, ctx: &egui::Context) {
        let (mut reset, mut exit) =
            ctx.input(|i| (i.key_pressed(egui::Key::R), i.key_pressed(egui::Key::Escape)));

        let Some(preview) = self.preview.as_mut() else {
            return;
        };

        if let Some(frame) = preview.frames.take() {
            upload_frame(ctx, &mut preview.texture, &frame);
        }
        let source_gone = preview.capture.stop_reason() == Some(StopReason::TargetGone);

        let panel_frame = egui::Frame::none()
            .fill(egui::Color32::BLACK)
            .stroke(egui::Stroke::new(2.0, egui::Color32::from_gray(0x55)));

        egui::CentralPanel::default().frame(panel_frame).show(ctx, |ui| {
            let area = ui.max_rect();
            let body = ui.interact(area, ui.id().with("preview_body"), egui::Sense::click_and_drag());

            match preview.texture.as_ref() {
                Some(texture) => {
                    let tex_size = texture.size_vec2();
                    let scale = (area.width() / tex_size.x).min(area.height() / tex_size.y);
                    let image_rect = egui::Rect::from_center_size(area.center(), tex_size * scale);
                    ui.painter().image(
                        texture.id(),
                        image_rect,
                        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                        egui::Color32::WHITE,
                    );
                }
                None => {
                    ui.painter().text(
                        area.center(),
                        egui::Align2::CENTER_CENTER,
                        "Loading...",
                        egui::FontId::proportional(16.0),
                        egui::Color32::LIGHT_GRAY,
                    );
                }
            }

            if source_gone {
                ui.painter().text(
                    area.center_top() + egui::vec2(0.0, 12.0),
                    egui::Align2::CENTER_TOP,
                    "Source closed",
                    egui::FontId::proportional(14.0),
                    egui::Color32::from_rgb(255, 136, 0),
                );
            }

            let grip_rect = egui::Rect::from_min_size(area.max - egui::vec2(GRIP_SIZE, GRIP_SIZE), egui::vec2(GRIP_SIZE, GRIP_SIZE));
            let grip = ui.interact(grip_rect, ui.id().with("resize_grip"), egui::Sense::drag());
            paint_grip(ui.painter(), grip_rect);

            if grip.drag_started() {
                ctx.send_viewport_cmd(ViewportCommand::BeginResize(ResizeDirection::SouthEast));
            } else if body.drag_started_by(egui::PointerButton::Primary) {
                ctx.send_viewport_cmd(ViewportCommand::StartDrag);
            }

            body.context_menu(|ui| {
                if ui.button("Reset / Change Source (R)").clicked() {
                    reset = true;
                    ui.close_menu();
                }
                ui.separator();
                if ui.button("Exit (Esc)").clicked() {
                    exit = true;
                    ui.close_menu();
                }
            });
        });

        if exit {
            ctx.send_viewport_cmd(ViewportCommand::Close);
        } else if reset {
            self.reset_to_picker(ctx);
        }
    }
}

/// Copy a frame into the preview texture, downscaling to the window first
fn upload_frame(ctx: &egui::Context, texture: &mut Option<egui::TextureHandle>, frame: &Frame) {
    let max = ctx.screen_rect().size() * ctx.pixels_per_point();
    let (max_w, max_h) = (max.x.max(1.0) as u32, max.y.max(1.0) as u32);

    let image = if frame.width() <= max_w && frame.height() <= max_h {
        egui::ColorImage::from_rgb([frame.width() as usize, frame.height() as usize], frame.data())
    } else {
        let scaled = frame.resize_to_fit(max_w, max_h);
        egui::ColorImage::from_rgb([scaled.width() as usize, scaled.height() as usize], scaled.as_raw())
    };

    match texture {
        Some(handle) => handle.set(image, egui::TextureOptions::LINEAR),
        None => *texture = Some(ctx.load_texture("pip-preview", image, egui::TextureOptions::LINEAR)),
    }
}

fn paint_grip(painter: &egui::Painter, rect: egui::Rect) {
    let stroke = egui::Stroke::new(1.5, egui::Color32::from_gray(0x99));
    for offset in [4.0, 8.0, 12.0] {
        painter.line_segment(
            [
                egui::pos2(rect.max.x - offset, rect.max.y - 2.0),
                egui::pos2(rect.max.x - 2.0, rect.max.y - offset),
            ],
            stroke,
        );
    }
}

impl eframe::App for PipApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        if self.main_hwnd == 0 {
            use raw_window_handle::{HasWindowHandle, RawWindowHandle};
            if let Ok(handle) = frame.window_handle() {
                if let RawWindowHandle::Win32(win32) = handle.as_raw() {
                    self.main_hwnd = win32.hwnd.get();
                }
            }
        }

        self.poll_selection(ctx);

        match self.state_machine.state() {
            AppState::Picking => self.show_picker(ctx),
            AppState::Selecting => {
                egui::CentralPanel::default().show(ctx, |ui| {
                    ui.centered_and_justified(|ui| {
                        ui.label(AppState::Selecting.display_text());
                    });
                });
            }
            AppState::Previewing => self.show_preview(ctx),
        }
    }
}
