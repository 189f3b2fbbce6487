use super::Device;

// The display texture the finalize kernel writes into.
// The surface is only writable while a `BoundSurface` is alive
#[derive(Debug)]
pub struct RenderTarget<D: Device> {
    texture: Option<D::Texture>,
    width: u32,
    height: u32,
    surface: Option<D::Surface>,
}

impl<D: Device> Default for RenderTarget<D> {
    fn default() -> Self {
        Self {
            texture: None,
            width: 0,
            height: 0,
            surface: None,
        }
    }
}

impl<D: Device> RenderTarget<D> {
    // Adopting a new texture drops any link to the previous one
    pub fn set_texture(&mut self, texture: D::Texture, width: u32, height: u32) {
        self.texture = Some(texture);
        self.width = width;
        self.height = height;
        self.surface = None;
    }

    pub fn link_to_surface(&mut self, device: &D, symbol: &'static str) -> anyhow::Result<()> {
        let texture = self.texture.as_ref().ok_or_else(|| {
            crate::error::CoreError::Interop(format!("no texture to link as `{}`", symbol))
        })?;

        self.surface = Some(device.link_surface(texture, symbol)?);

        Ok(())
    }

    pub fn size(&self) -> (u32, u32) { (self.width, self.height) }

    pub fn texture(&self) -> Option<&D::Texture> { self.texture.as_ref() }

    pub fn is_linked(&self) -> bool { self.surface.is_some() }

    pub fn bind_surface<'a>(&'a self, device: &'a D) -> anyhow::Result<BoundSurface<'a, D>> {
        let surface = self.surface.as_ref().ok_or_else(|| {
            crate::error::CoreError::Interop(String::from("render target was never linked"))
        })?;

        device.bind_surface(surface)?;

        Ok(BoundSurface { device, surface })
    }
}

// Unbinds on drop, so an early return out of finalization cannot leave
// the display surface bound
#[derive(Debug)]
pub struct BoundSurface<'a, D: Device> {
    device: &'a D,
    surface: &'a D::Surface,
}

impl<'a, D: Device> BoundSurface<'a, D> {
    pub fn surface(&self) -> &D::Surface { self.surface }

    pub fn unbind_surface(self) {}
}

impl<'a, D: Device> Drop for BoundSurface<'a, D> {
    fn drop(&mut self) {
        self.device.unbind_surface(self.surface);
    }
}
