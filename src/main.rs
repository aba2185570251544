// Vulkan primer - presentation window and render loop
//
// Owns the platform window, depth image, command pool and the top-level
// render loop. Everything Vulkan-specific lives in backend/.
//
// FRAME FLOW:
// 1. Wait for the frame slot's previous submission
// 2. Acquire swapchain image
// 3. Submit pre-recorded commands
// 4. Present rendered image to screen

mod backend;
mod config;

use anyhow::{Context, Result};
use ash::vk;
use backend::{command, DepthBuffer, Swapchain, VulkanDevice};
use config::Config;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

fn main() -> Result<()> {
    // Logging first so config-load warnings are visible
    init_logging();

    let config = Config::load();
    log::info!("Starting Vulkan primer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

/// Main application struct holding all Vulkan resources.
///
/// IMPORTANT: resources are destroyed in reverse order of creation in Drop
/// to avoid use-after-free.
pub struct App {
    config: Config,

    // Window & surface
    window: Option<Arc<Window>>,
    surface: Option<vk::SurfaceKHR>,
    surface_loader: Option<ash::extensions::khr::Surface>,
    is_fullscreen: bool,

    // Vulkan core
    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<Swapchain>,
    depth: Option<DepthBuffer>,

    // Commands
    command_pool: Option<vk::CommandPool>,
    /// One command buffer per swapchain image (pre-recorded)
    command_buffers: Vec<vk::CommandBuffer>,

    // Synchronization
    frame_sync: Vec<backend::sync::FrameSync>,
    current_frame: usize,

    // Pre-allocated to avoid per-frame heap allocations
    wait_stages: [vk::PipelineStageFlags; 1],

    /// Set when the window is resized - triggers swapchain recreation
    needs_resize: bool,
    /// Set when the window is minimized (size = 0) - skip rendering
    is_minimized: bool,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            window: None,
            surface: None,
            surface_loader: None,
            is_fullscreen,
            device: None,
            swapchain: None,
            depth: None,
            command_pool: None,
            command_buffers: Vec::new(),
            frame_sync: Vec::new(),
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            needs_resize: false,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Initialize all Vulkan resources. Called once when the window exists.
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(&self.config.window.title, enable_validation)?;

        let surface_loader =
            ash::extensions::khr::Surface::new(device.entry(), &device.instance);
        let surface = create_surface(device.entry(), &device.instance, &window)?;

        // Verify the GPU supports presenting to this surface
        let surface_support = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )?
        };

        if !surface_support {
            anyhow::bail!("GPU doesn't support presenting to this surface");
        }

        self.device = Some(device.clone());
        self.surface = Some(surface);
        self.surface_loader = Some(surface_loader);

        self.create_swapchain_resources(&window)?;

        // Sync objects don't need to be recreated on resize
        let max_frames = self.config.graphics.max_frames_in_flight;
        let frame_sync = (0..max_frames)
            .map(|_| backend::sync::FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        self.frame_sync = frame_sync;

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    /// Create the swapchain, depth buffer and command buffers.
    ///
    /// Separate from init_vulkan because it runs again on window resize.
    fn create_swapchain_resources(&mut self, window: &Window) -> Result<()> {
        let device = self.device.clone().context("Device not initialized")?;
        let surface = self.surface.context("Surface not initialized")?;
        let surface_loader = self
            .surface_loader
            .as_ref()
            .context("Surface loader not initialized")?;

        let size = window.inner_size();

        // No swapchain while minimized (size = 0)
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        // The surface can only have one swapchain at a time; drop the old
        // one and its depth buffer before creating replacements
        self.swapchain = None;
        if let Some(depth) = self.depth.take() {
            depth.destroy(&device.device);
        }

        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            surface_loader,
            size.width,
            size.height,
            self.config.get_present_mode(),
        )?;

        log::debug!(
            "Swapchain format {:?}, extent {}x{}",
            swapchain.format,
            swapchain.extent.width,
            swapchain.extent.height
        );

        let depth = DepthBuffer::new(&device, swapchain.extent)?;

        if self.command_pool.is_none() {
            self.command_pool = Some(command::create_command_pool(
                &device.device,
                device.graphics_queue_family,
            )?);
        }
        let command_pool = self.command_pool.context("Command pool not initialized")?;

        // The fresh depth image starts UNDEFINED; move it to its working
        // layout once, before any frame uses it
        transition_depth_image(&device, command_pool, &depth)?;

        // One pre-recorded command buffer per swapchain image
        if !self.command_buffers.is_empty() {
            unsafe {
                device
                    .device
                    .free_command_buffers(command_pool, &self.command_buffers);
            }
        }

        let command_buffers = command::allocate_command_buffers(
            &device.device,
            command_pool,
            swapchain.image_count() as u32,
        )?;

        self.record_clear_commands(&device.device, &swapchain, &command_buffers)?;

        log::info!(
            "Created {} pre-recorded command buffers",
            command_buffers.len()
        );

        self.swapchain = Some(swapchain);
        self.depth = Some(depth);
        self.command_buffers = command_buffers;
        self.needs_resize = false;

        Ok(())
    }

    /// Recreate swapchain-sized resources after a window resize.
    fn recreate_swapchain(&mut self) -> Result<()> {
        // Wait for the GPU to finish all work before destroying resources
        if let Some(ref device) = self.device {
            device.wait_idle()?;
        }

        let window = self.window.clone();
        if let Some(ref win) = window {
            self.create_swapchain_resources(win)?;
        }

        Ok(())
    }

    /// Pre-record a clear of every swapchain image.
    ///
    /// The content is static, so recording once and resubmitting per frame
    /// is enough.
    fn record_clear_commands(
        &self,
        device: &ash::Device,
        swapchain: &Swapchain,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        let clear_color = vk::ClearColorValue {
            float32: self.config.graphics.clear_color,
        };

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        for (i, &cmd) in command_buffers.iter().enumerate() {
            let image = swapchain.buffers[i].image;

            command::begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::empty())?;

            // vkCmdClearColorImage needs the image in TRANSFER_DST layout
            command::set_image_layout(
                device,
                cmd,
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            );

            unsafe {
                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_color,
                    &[subresource_range],
                );
            }

            // Presentation requires PRESENT_SRC layout
            command::set_image_layout(
                device,
                cmd,
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            );

            command::end_command_buffer(device, cmd)?;
        }

        Ok(())
    }

    /// Render a single frame. This is the hot path.
    pub fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        if self.needs_resize {
            self.recreate_swapchain()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        let device = self.device.clone().context("Device not initialized")?;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;

        let sync = &self.frame_sync[self.current_frame];
        let image_available = sync.image_available;
        let render_finished = sync.render_finished;
        let in_flight_fence = sync.in_flight_fence;

        // Wait for the previous frame that used this sync slot; only then is
        // image_available guaranteed to have no pending semaphore wait
        unsafe {
            device
                .device
                .wait_for_fences(&[in_flight_fence], true, u64::MAX)?;
        }

        let acquired = swapchain.acquire_next_image(u64::MAX, image_available)?;

        let image_index = match acquired {
            Some((index, suboptimal)) => {
                if suboptimal {
                    self.needs_resize = true;
                }
                index
            }
            None => {
                // Out of date - recreate next frame
                self.needs_resize = true;
                return Ok(false);
            }
        };

        // Reset only once a submit is certain, or the next wait deadlocks
        unsafe {
            device.device.reset_fences(&[in_flight_fence])?;
        }

        let cmd = self.command_buffers[image_index as usize];

        command::submit_command_buffers(
            &device.device,
            device.graphics_queue,
            &[cmd],
            &[image_available],
            &self.wait_stages,
            &[render_finished],
            in_flight_fence,
        )?;

        let needs_recreate =
            swapchain.present(device.graphics_queue, image_index, &[render_finished])?;
        if needs_recreate {
            self.needs_resize = true;
        }

        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        Ok(true)
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            self.needs_resize = true;
        }
    }

    pub fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update the title once a second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen {
                    "fullscreen"
                } else {
                    "windowed"
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref device) = self.device {
                    let _ = device.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(rendered) => {
                    if rendered {
                        self.update_fps();
                    }
                }
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws for a live render loop.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            // Wait for the GPU to finish before destroying anything
            let _ = device.wait_idle();

            unsafe {
                // Destroy in reverse order of creation

                for sync in &self.frame_sync {
                    sync.destroy(&device.device);
                }

                if let Some(pool) = self.command_pool {
                    device.device.destroy_command_pool(pool, None);
                }

                if let Some(depth) = self.depth.take() {
                    depth.destroy(&device.device);
                }

                // Swapchain drops before the surface it was created from
                self.swapchain = None;

                if let (Some(surface), Some(ref loader)) = (self.surface, &self.surface_loader) {
                    loader.destroy_surface(surface, None);
                }

                // Device is dropped automatically (Arc)
            }
        }

        log::info!("Cleanup complete");
    }
}

/// Move the freshly created depth image from UNDEFINED to its attachment
/// layout with a one-shot command buffer.
fn transition_depth_image(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    depth: &DepthBuffer,
) -> Result<()> {
    let cmd = command::allocate_command_buffers(&device.device, pool, 1)?[0];

    command::begin_command_buffer(
        &device.device,
        cmd,
        vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
    )?;
    command::set_image_layout(
        &device.device,
        cmd,
        depth.image,
        depth.aspect_mask(),
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::AccessFlags::empty(),
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
    );
    command::end_command_buffer(&device.device, cmd)?;

    let result = command::submit_and_wait(&device.device, device.graphics_queue, cmd);

    unsafe { device.device.free_command_buffers(pool, &[cmd]) };
    result
}

/// Create the window surface.
///
/// Exactly the platform branches the renderer supports: Win32 and X11
/// (XCB, plus the Xlib handle winit reports by default on X11).
fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &Window,
) -> Result<vk::SurfaceKHR> {
    let window_handle = window
        .window_handle()
        .context("Failed to get window handle")?
        .as_raw();
    let display_handle = window
        .display_handle()
        .context("Failed to get display handle")?
        .as_raw();

    match (display_handle, window_handle) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0)
                as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;

            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);

            let loader = ash::extensions::khr::Win32Surface::new(entry, instance);
            let surface = unsafe { loader.create_win32_surface(&create_info, None) }
                .context("Failed to create Win32 surface")?;
            Ok(surface)
        }

        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .map(|c| c.as_ptr())
                .unwrap_or(std::ptr::null_mut());

            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection)
                .window(handle.window.get());

            let loader = ash::extensions::khr::XcbSurface::new(entry, instance);
            let surface = unsafe { loader.create_xcb_surface(&create_info, None) }
                .context("Failed to create XCB surface")?;
            Ok(surface)
        }

        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .map(|d| d.as_ptr())
                .unwrap_or(std::ptr::null_mut());

            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.cast())
                .window(handle.window);

            let loader = ash::extensions::khr::XlibSurface::new(entry, instance);
            let surface = unsafe { loader.create_xlib_surface(&create_info, None) }
                .context("Failed to create Xlib surface")?;
            Ok(surface)
        }

        _ => anyhow::bail!("Unsupported window system"),
    }
}
