//! Smoke test for the overlay backend
//! Cycles solid colors on the panel to prove the commit path is working

use mdp_overlay_backend::OverlayBackend;

fn fill(frame: &mut [u8], bytes_per_pixel: u32, rgb: (u8, u8, u8)) {
    let (r, g, b) = rgb;
    match bytes_per_pixel {
        2 => {
            let px = ((r as u16 & 0xf8) << 8) | ((g as u16 & 0xfc) << 3) | (b as u16 >> 3);
            for chunk in frame.chunks_exact_mut(2) {
                chunk.copy_from_slice(&px.to_le_bytes());
            }
        }
        _ => {
            for chunk in frame.chunks_exact_mut(4) {
                chunk.copy_from_slice(&[r, g, b, 0xff]);
            }
        }
    }
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    println!("=== MDP Overlay Backend Test ===");

    if !OverlayBackend::supported() {
        println!("This target's display driver has no overlay support");
        return;
    }

    let mut backend = match OverlayBackend::open() {
        Ok(backend) => backend,
        Err(e) => {
            println!("Failed to open overlay backend: {}", e);
            return;
        }
    };

    let surface = backend.surface();
    println!("Display initialized!");
    println!("  Resolution: {}x{}", surface.width, surface.height);
    println!("  Row stride: {} bytes", surface.row_bytes);
    println!("  Pixel size: {} bytes", surface.bytes_per_pixel);

    let colors = [
        (0xff, 0x00, 0x00), // Red
        (0x00, 0xff, 0x00), // Green
        (0x00, 0x00, 0xff), // Blue
        (0xff, 0xff, 0x00), // Yellow
        (0xff, 0x00, 0xff), // Magenta
        (0x00, 0xff, 0xff), // Cyan
    ];
    let color_names = ["RED", "GREEN", "BLUE", "YELLOW", "MAGENTA", "CYAN"];

    println!("\nRendering colored frames...");
    println!("You should see RED -> GREEN -> BLUE cycling");

    for i in 0..180 {
        // change color every 30 frames (~0.5s at 60Hz)
        let color_idx = (i / 30) % colors.len();

        let frame = backend.acquire_next_writable();
        fill(frame, surface.bytes_per_pixel, colors[color_idx]);

        if let Err(e) = backend.flip() {
            println!("Frame {} failed: {}", i, e);
            break;
        }

        if i % 30 == 0 {
            println!("Frame {}: Showing {}", i, color_names[color_idx]);
        }
    }

    println!("\nTest complete! Did you see colors cycling on the display?");
    backend.shutdown();
}
