use ash::vk;
use glam::{Mat4, Vec2, Vec3};

/// Orthographic 2D camera. World units map to pixels at zoom 1.0, with the
/// origin at the center of the viewport and +Y pointing up.
pub struct Camera {
    position: Vec2,
    zoom: f32,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            position: Vec2::ZERO,
            zoom: 1.0,
        }
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.position = position;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.max(f32::EPSILON);
    }

    pub fn get_position(&self) -> Vec2 {
        self.position
    }

    pub fn get_zoom(&self) -> f32 {
        self.zoom
    }

    pub fn get_viewproj_mat(&self, extent: vk::Extent2D) -> Mat4 {
        self.get_proj_mat(extent) * self.get_view_mat()
    }

    pub fn get_view_mat(&self) -> Mat4 {
        Mat4::from_translation(-Vec3::new(self.position.x, self.position.y, 0.0))
    }

    pub fn get_proj_mat(&self, extent: vk::Extent2D) -> Mat4 {
        let half_w = extent.width.max(1) as f32 * 0.5 / self.zoom;
        let half_h = extent.height.max(1) as f32 * 0.5 / self.zoom;
        Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, -1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn viewport_center_maps_to_ndc_origin() {
        let mut camera = Camera::new();
        camera.set_position(Vec2::new(100.0, -40.0));
        let viewproj = camera.get_viewproj_mat(vk::Extent2D {
            width: 800,
            height: 600,
        });
        let clip = viewproj * Vec4::new(100.0, -40.0, 0.0, 1.0);
        assert!(clip.x.abs() < 1e-6);
        assert!(clip.y.abs() < 1e-6);
    }

    #[test]
    fn zoom_scales_visible_extent() {
        let mut camera = Camera::new();
        camera.set_zoom(2.0);
        let viewproj = camera.get_viewproj_mat(vk::Extent2D {
            width: 800,
            height: 600,
        });
        // At zoom 2, a point 200px right of center lands on the clip edge.
        let clip = viewproj * Vec4::new(200.0, 0.0, 0.0, 1.0);
        assert!((clip.x - 1.0).abs() < 1e-6);
    }
}
