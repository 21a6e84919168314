//! Hardware composer core
//!
//! [`HwComposer`] is the entry point the display-stack client talks to. Each
//! frame arrives twice: once through [`HwComposer::prepare`], which decides
//! how every layer is presented, and once through [`HwComposer::set`], which
//! programs the hardware accordingly.
//!
//! # Frame programming
//!
//! For every layer, in order:
//!
//! 1. the acquire fence is taken out of the layer, waited on and closed
//! 2. overlay layers are handed to the [`VideoPlane`]
//! 3. the framebuffer target moves the primary scan origin
//!
//! Failures are logged and remembered; the remaining layers are still
//! programmed and the first failure is returned. Once the layers are done the
//! base plane activation is updated and a video plane that is no longer used
//! is closed.
//!
//! # Vsync
//!
//! The timing thread is started on the first [`HwComposer::register_procs`]
//! call. [`HwComposer::event_control`] only flips the delivery flag (and the
//! kernel interrupt, unless ticks are synthetic).

pub mod activation;

use std::fmt::Write as _;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::classify::{classify_layers, Classification};
use crate::config::{HwcConfig, Policy};
use crate::convert::{ColorConverter, LoggingConverter};
use crate::display::{DisplayAttributes, DisplayId, DisplayStore};
use crate::error::{HwcError, HwcResult};
use crate::fb::{DeviceOpener, FbDeviceOpener, FramebufferDevice};
use crate::fps::FpsCounter;
use crate::layer::{CompositionType, DisplayContents, Layer};
use crate::overlay::VideoPlane;
use crate::vsync::{HwcProcs, VsyncState, VsyncThread};

use activation::Activation;

/// Events the client can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HwcEvent {
    Vsync = 0,
}

impl TryFrom<u32> for HwcEvent {
    type Error = HwcError;

    fn try_from(raw: u32) -> HwcResult<Self> {
        match raw {
            0 => Ok(HwcEvent::Vsync),
            other => Err(HwcError::UnsupportedEvent(other)),
        }
    }
}

/// Values the client can query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Vsync period of the primary display in nanoseconds
    VsyncPeriod,
}

/// The composer device
pub struct HwComposer {
    config: HwcConfig,
    displays: DisplayStore,
    policy: Arc<Policy>,
    vsync: Arc<VsyncState>,
    vsync_thread: Option<VsyncThread>,
    opener: Box<dyn DeviceOpener>,
    converter: Box<dyn ColorConverter>,
    video_plane: VideoPlane,
    fps: FpsCounter,
}

impl HwComposer {
    /// Open the composer on the real framebuffer devices
    pub fn open(config: HwcConfig) -> HwcResult<Self> {
        Self::with_backend(
            config,
            Box::new(FbDeviceOpener),
            Box::new(LoggingConverter::new()),
        )
    }

    /// Open the composer on an explicit device backend and color converter
    pub fn with_backend(
        config: HwcConfig,
        opener: Box<dyn DeviceOpener>,
        converter: Box<dyn ColorConverter>,
    ) -> HwcResult<Self> {
        let path = &config.devices.primary;
        let primary = opener.open(path).map_err(|source| HwcError::DeviceOpen {
            path: path.clone(),
            source,
        })?;

        let var = primary
            .var_screeninfo()
            .map_err(|e| HwcError::ioctl("FBIOGET_VSCREENINFO", e))?;
        let fix = primary
            .fix_screeninfo()
            .map_err(|e| HwcError::ioctl("FBIOGET_FSCREENINFO", e))?;
        if fix.smem_len == 0 {
            return Err(HwcError::InvalidArgument("primary framebuffer has no memory"));
        }

        let attrs = DisplayAttributes::from_mode_info(
            &var,
            &fix,
            config.vsync.period_ns(),
            config.display.default_dpi,
        );
        info!(
            "🖥️  {} {}x{} stride {} dpi {:.1}x{:.1}",
            path.display(),
            attrs.xres,
            attrs.yres,
            attrs.stride,
            attrs.xdpi,
            attrs.ydpi
        );

        let policy = Arc::new(Policy::new(&config.policy));
        if let Err(e) = primary.set_overlay_state(policy.use_overlay()) {
            warn!("cannot set overlay state: {}", e);
        }

        let mut displays = DisplayStore::new();
        let display = displays.get_mut(DisplayId::Primary);
        display.attrs = attrs;
        display.primary = Some(primary);

        Ok(Self {
            config,
            displays,
            policy,
            vsync: Arc::new(VsyncState::new()),
            vsync_thread: None,
            opener,
            converter,
            video_plane: VideoPlane::new(),
            fps: FpsCounter::default(),
        })
    }

    pub fn config(&self) -> &HwcConfig {
        &self.config
    }

    /// Runtime composition policy, shared with whoever flips it
    pub fn policy(&self) -> Arc<Policy> {
        self.policy.clone()
    }

    pub fn vsync_state(&self) -> Arc<VsyncState> {
        self.vsync.clone()
    }

    pub fn displays(&self) -> &DisplayStore {
        &self.displays
    }

    /// Whether the video plane device is currently open
    pub fn video_plane_open(&self) -> bool {
        self.displays.get(DisplayId::Primary).video.is_some()
    }

    /// Classify the frames of every display, highest index first.
    ///
    /// `displays[i]` holds the frame for display slot `i`, if any. All
    /// present frames are visited; the first error is returned.
    pub fn prepare(&mut self, displays: &mut [Option<DisplayContents>]) -> HwcResult<()> {
        let mut first_error = None;

        for (index, contents) in displays.iter_mut().enumerate().rev() {
            let Some(contents) = contents.as_mut() else {
                continue;
            };
            let result = DisplayId::from_index(index)
                .and_then(|id| self.classify(id, contents))
                .map(|_| ());
            if let Err(e) = result {
                warn!("prepare display {}: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Classify one frame; only the primary display is composed
    pub fn classify(
        &mut self,
        display: DisplayId,
        contents: &mut DisplayContents,
    ) -> HwcResult<Classification> {
        if display != DisplayId::Primary {
            return Err(HwcError::InvalidDisplay(display.index()));
        }

        let result = classify_layers(
            contents,
            self.policy.use_overlay(),
            self.converter.as_mut(),
        );
        debug!(
            "prepare: {} layers, {} overlay, {} converted",
            contents.len(),
            result.overlays,
            result.conversions
        );
        Ok(result)
    }

    /// Program the frames of every display, lowest index first.
    ///
    /// All present frames are visited; the first error is returned.
    pub fn set(&mut self, displays: &mut [Option<DisplayContents>]) -> HwcResult<()> {
        let mut first_error = None;

        for (index, contents) in displays.iter_mut().enumerate() {
            let Some(contents) = contents.as_mut() else {
                continue;
            };
            let result = DisplayId::from_index(index).and_then(|id| self.program(id, contents));
            if let Err(e) = result {
                warn!("set display {}: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Program one frame on the hardware
    pub fn program(&mut self, display: DisplayId, contents: &mut DisplayContents) -> HwcResult<()> {
        if display != DisplayId::Primary {
            return Err(HwcError::InvalidDisplay(display.index()));
        }

        let mut first_error: Option<HwcError> = None;
        let mut overlay_used = false;

        for (index, layer) in contents.layers.iter_mut().enumerate() {
            let fence = layer.acquire_fence.take();
            if let Some(fence) = fence.as_ref() {
                if let Err(e) = fence.wait() {
                    warn!("layer {}: acquire fence wait failed: {}", index, e);
                }
            }

            let result = match layer.composition_type {
                CompositionType::Overlay => {
                    overlay_used = true;
                    self.video_plane.program(
                        self.displays.get_mut(DisplayId::Primary),
                        self.opener.as_ref(),
                        &self.config.devices.video,
                        layer,
                    )
                }
                CompositionType::FramebufferTarget => self.post_framebuffer(layer),
                CompositionType::Framebuffer => Ok(()),
            };

            if let Some(fence) = fence {
                fence.close();
            }

            if let Err(e) = result {
                warn!("layer {}: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.update_activation(overlay_used, contents.len()) {
            warn!("base plane activation: {}", e);
            first_error.get_or_insert(e);
        }

        if !overlay_used {
            self.close_video_plane();
        }

        if self.policy.log_fps() {
            self.fps.frame();
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Move the primary scan origin to the row where `layer`'s buffer starts
    fn post_framebuffer(&self, layer: &Layer) -> HwcResult<()> {
        let Some(handle) = layer.handle.as_ref() else {
            return Ok(());
        };

        let display = self.displays.get(DisplayId::Primary);
        let stride = display.attrs.stride;
        if stride == 0 {
            return Err(HwcError::InvalidArgument("zero framebuffer stride"));
        }
        let primary = primary_device(display.primary.as_deref())?;

        let mut info = primary
            .var_screeninfo()
            .map_err(|e| HwcError::ioctl("FBIOGET_VSCREENINFO", e))?;
        info.yoffset = handle.offset / stride;
        debug!("framebuffer target at row {}", info.yoffset);
        primary
            .put_var_screeninfo(&info)
            .map_err(|e| HwcError::ioctl("FBIOPUT_VSCREENINFO", e))
    }

    fn update_activation(&mut self, overlay_used: bool, layer_count: usize) -> HwcResult<()> {
        let display = self.displays.get_mut(DisplayId::Primary);
        let current = Activation::from_flag(display.attrs.is_active);
        let Some(next) = current.transition(overlay_used, layer_count) else {
            return Ok(());
        };

        debug!("base plane {:?} -> {:?}", current, next);
        display.attrs.is_active = next.is_active();
        primary_device(display.primary.as_deref())?
            .set_plane_enabled(next.is_active())
            .map_err(|e| HwcError::ioctl("RK_FBIOSET_ENABLE", e))
    }

    /// Disable and close the video plane if it is open
    fn close_video_plane(&mut self) {
        let Some(video) = self.displays.get_mut(DisplayId::Primary).video.take() else {
            return;
        };
        if let Err(e) = video.set_plane_enabled(false) {
            warn!("cannot disable video plane: {}", e);
        }
        drop(video);
        self.video_plane.reset();
        debug!("video plane closed");
    }

    /// Turn delivery of `event` on `display` on or off.
    ///
    /// Requests that do not change the current state issue no hardware call.
    pub fn event_control(
        &mut self,
        display: DisplayId,
        event: HwcEvent,
        enabled: bool,
    ) -> HwcResult<()> {
        if display != DisplayId::Primary {
            return Err(HwcError::InvalidDisplay(display.index()));
        }

        match event {
            HwcEvent::Vsync => {
                if self.vsync.enabled() == enabled {
                    return Ok(());
                }
                if !self.vsync.fake() {
                    primary_device(self.displays.get(display).primary.as_deref())?
                        .set_vsync_enabled(enabled)
                        .map_err(|e| HwcError::ioctl("RK_FBIOSET_VSYNC_ENABLE", e))?;
                }
                self.vsync.set_enabled(enabled);
                debug!("vsync {}", if enabled { "enabled" } else { "disabled" });
                Ok(())
            }
        }
    }

    pub fn set_vsync_enabled(&mut self, display: DisplayId, enabled: bool) -> HwcResult<()> {
        self.event_control(display, HwcEvent::Vsync, enabled)
    }

    /// Blanking is driven by the kernel; accepted and ignored
    pub fn blank(&mut self, display: DisplayId, blank: bool) -> HwcResult<()> {
        debug!("blank {} = {}", display, blank);
        Ok(())
    }

    pub fn query(&self, what: Query) -> HwcResult<i32> {
        match what {
            Query::VsyncPeriod => Ok(self.displays.attributes(DisplayId::Primary).vsync_period as i32),
        }
    }

    /// Install the client's callback table and start the timing thread once
    pub fn register_procs(&mut self, procs: Arc<dyn HwcProcs>) {
        if self.vsync.register(procs) {
            info!("callback table replaced");
        }
        if self.vsync_thread.is_some() {
            return;
        }

        match VsyncThread::start(
            self.vsync.clone(),
            &self.config.vsync,
            &self.config.devices.vsync_timestamp,
        ) {
            Ok(thread) => self.vsync_thread = Some(thread),
            Err(e) => warn!("cannot start vsync thread: {}", e),
        }
    }

    /// Whether the timing thread has been started
    pub fn vsync_running(&self) -> bool {
        self.vsync_thread
            .as_ref()
            .map(VsyncThread::is_running)
            .unwrap_or(false)
    }

    pub fn display_configs(&self, display: DisplayId) -> HwcResult<Vec<u32>> {
        self.displays.display_configs(display)
    }

    pub fn display_attributes(
        &self,
        display: DisplayId,
        config: u32,
        attributes: &[u32],
    ) -> HwcResult<Vec<i32>> {
        self.displays.display_attributes(display, config, attributes)
    }

    /// Human-readable state summary
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for id in DisplayId::ALL {
            let display = self.displays.get(id);
            if display.primary.is_none() && !display.attrs.connected {
                continue;
            }
            let attrs = &display.attrs;
            let _ = writeln!(
                out,
                "{}: {}x{} stride {} dpi {:.1}x{:.1} period {}ns active {} video {}",
                id,
                attrs.xres,
                attrs.yres,
                attrs.stride,
                attrs.xdpi,
                attrs.ydpi,
                attrs.vsync_period,
                attrs.is_active,
                if display.video.is_some() { "open" } else { "closed" },
            );
        }
        let _ = writeln!(
            out,
            "vsync: enabled {} fake {} delivered {} thread {}",
            self.vsync.enabled(),
            self.vsync.fake(),
            self.vsync.delivered(),
            if self.vsync_running() { "running" } else { "stopped" },
        );
        let _ = writeln!(
            out,
            "policy: use_overlay {} log_fps {}",
            self.policy.use_overlay(),
            self.policy.log_fps()
        );
        out
    }

    /// Stop the timing thread and release the video plane
    pub fn shutdown(&mut self) {
        if let Some(mut thread) = self.vsync_thread.take() {
            thread.shutdown();
            info!("vsync thread stopped");
        }
        self.close_video_plane();
    }
}

impl Drop for HwComposer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn primary_device(device: Option<&dyn FramebufferDevice>) -> HwcResult<&dyn FramebufferDevice> {
    device.ok_or(HwcError::NotConnected(DisplayId::Primary))
}
