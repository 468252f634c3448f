//! Surface provider trait for decoupling windowing from renderer initialization.

use std::ffi::CStr;

use ash::{khr::surface, vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::{RendererError, Result};

/// Trait for providing a Vulkan surface to the renderer.
pub trait SurfaceProvider {
    /// Create a Vulkan surface using the provided entry and instance.
    ///
    /// # Safety
    /// The caller must ensure the entry and instance are valid.
    unsafe fn create_surface(&self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR>;

    /// Current drawable size. A zero dimension means the window is minimized.
    fn extent(&self) -> vk::Extent2D;

    /// Instance extensions needed to create the surface.
    fn required_extensions(&self) -> Vec<&'static CStr> {
        let mut extensions = vec![surface::NAME];

        #[cfg(target_os = "windows")]
        extensions.push(ash::khr::win32_surface::NAME);

        #[cfg(target_os = "linux")]
        extensions.push(ash::khr::xlib_surface::NAME);

        #[cfg(target_os = "macos")]
        extensions.push(ash::ext::metal_surface::NAME);

        extensions
    }
}

/// Window-based surface provider wrapping any type that implements
/// `HasWindowHandle` and `HasDisplayHandle` (e.g., winit::Window).
pub struct WindowSurfaceProvider<W> {
    window: W,
    width: u32,
    height: u32,
}

impl<W> WindowSurfaceProvider<W> {
    pub fn new(window: W, width: u32, height: u32) -> Self {
        Self {
            window,
            width,
            height,
        }
    }

    /// Update the extent (e.g., after window resize).
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn window(&self) -> &W {
        &self.window
    }
}

impl<W: HasWindowHandle + HasDisplayHandle> SurfaceProvider for WindowSurfaceProvider<W> {
    unsafe fn create_surface(&self, entry: &Entry, instance: &Instance) -> Result<vk::SurfaceKHR> {
        create_surface_from_handles(entry, instance, &self.window)
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    fn required_extensions(&self) -> Vec<&'static CStr> {
        let display = self.window.display_handle().map(|h| h.as_raw());
        let platform = match display {
            Ok(RawDisplayHandle::Windows(_)) => ash::khr::win32_surface::NAME,
            Ok(RawDisplayHandle::Wayland(_)) => ash::khr::wayland_surface::NAME,
            Ok(RawDisplayHandle::Xlib(_)) => ash::khr::xlib_surface::NAME,
            Ok(RawDisplayHandle::Xcb(_)) => ash::khr::xcb_surface::NAME,
            Ok(RawDisplayHandle::AppKit(_)) => ash::ext::metal_surface::NAME,
            _ => return vec![surface::NAME],
        };
        vec![surface::NAME, platform]
    }
}

#[cfg(target_os = "windows")]
unsafe fn create_surface_from_handles<W: HasWindowHandle + HasDisplayHandle>(
    entry: &Entry,
    instance: &Instance,
    window: &W,
) -> Result<vk::SurfaceKHR> {
    use ash::khr::win32_surface;

    let win32_surface_loader = win32_surface::Instance::new(entry, instance);

    match window.window_handle().map(|h| h.as_raw()) {
        Ok(RawWindowHandle::Win32(handle)) => {
            let hwnd = handle.hwnd.get();
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0);

            let create_info = vk::Win32SurfaceCreateInfoKHR::default()
                .hwnd(hwnd as vk::HWND)
                .hinstance(hinstance as vk::HINSTANCE);

            win32_surface_loader
                .create_win32_surface(&create_info, None)
                .map_err(|e| RendererError::VulkanError(format!("{e:?}")))
        }
        _ => Err(RendererError::DeviceInitFailed(
            "Invalid window handle".to_string(),
        )),
    }
}

#[cfg(target_os = "linux")]
unsafe fn create_surface_from_handles<W: HasWindowHandle + HasDisplayHandle>(
    entry: &Entry,
    instance: &Instance,
    window: &W,
) -> Result<vk::SurfaceKHR> {
    use ash::khr::{wayland_surface, xcb_surface, xlib_surface};

    let display = window
        .display_handle()
        .map_err(|e| {
            RendererError::DeviceInitFailed(format!("Failed to get display handle: {e:?}"))
        })?
        .as_raw();

    match (window.window_handle().map(|h| h.as_raw()), display) {
        (Ok(RawWindowHandle::Wayland(handle)), RawDisplayHandle::Wayland(display)) => {
            let loader = wayland_surface::Instance::new(entry, instance);
            let create_info = vk::WaylandSurfaceCreateInfoKHR::default()
                .display(display.display.as_ptr())
                .surface(handle.surface.as_ptr());
            loader
                .create_wayland_surface(&create_info, None)
                .map_err(|e| RendererError::VulkanError(format!("{e:?}")))
        }
        (Ok(RawWindowHandle::Xlib(handle)), RawDisplayHandle::Xlib(display)) => {
            let loader = xlib_surface::Instance::new(entry, instance);
            let create_info = vk::XlibSurfaceCreateInfoKHR::default()
                .dpy(
                    display
                        .display
                        .map(|d| d.as_ptr())
                        .unwrap_or(std::ptr::null_mut()) as *mut _,
                )
                .window(handle.window);
            loader
                .create_xlib_surface(&create_info, None)
                .map_err(|e| RendererError::VulkanError(format!("{e:?}")))
        }
        (Ok(RawWindowHandle::Xcb(handle)), RawDisplayHandle::Xcb(display)) => {
            let loader = xcb_surface::Instance::new(entry, instance);
            let create_info = vk::XcbSurfaceCreateInfoKHR::default()
                .connection(
                    display
                        .connection
                        .map(|c| c.as_ptr())
                        .unwrap_or(std::ptr::null_mut()),
                )
                .window(handle.window.get());
            loader
                .create_xcb_surface(&create_info, None)
                .map_err(|e| RendererError::VulkanError(format!("{e:?}")))
        }
        _ => Err(RendererError::DeviceInitFailed(
            "Invalid window handle".to_string(),
        )),
    }
}

#[cfg(target_os = "macos")]
unsafe fn create_surface_from_handles<W: HasWindowHandle + HasDisplayHandle>(
    _entry: &Entry,
    _instance: &Instance,
    _window: &W,
) -> Result<vk::SurfaceKHR> {
    Err(RendererError::MissingExtension(
        "VK_EXT_metal_surface requires a CAMetalLayer-backed view".to_string(),
    ))
}

#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
unsafe fn create_surface_from_handles<W: HasWindowHandle + HasDisplayHandle>(
    _entry: &Entry,
    _instance: &Instance,
    _window: &W,
) -> Result<vk::SurfaceKHR> {
    Err(RendererError::DeviceInitFailed(
        "Platform not supported for surface creation".to_string(),
    ))
}
