use argh::FromArgs;
use rand::Rng;
use std::path::PathBuf;

use kornia::image::{Image, ImageSize};
use kornia::tracking::{FeaturePoint, KeyframeData, Matrix34, TargetDataset, Tracker, TrackerConfig};

#[derive(FromArgs)]
/// Track a synthetic textured marker moving across the camera frame
struct Args {
    /// number of frames to track
    #[argh(option, short = 'n', default = "10")]
    num_frames: usize,

    /// horizontal motion of the marker per frame, in pixels
    #[argh(option, default = "1")]
    step_x: i64,

    /// vertical motion of the marker per frame, in pixels
    #[argh(option, default = "0")]
    step_y: i64,

    /// path to a JSON tracker configuration
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// expose the debug buffers
    #[argh(switch)]
    debug: bool,
}

const MARKER_SIZE: ImageSize = ImageSize {
    width: 160,
    height: 120,
};

const FRAME_SIZE: ImageSize = ImageSize {
    width: 320,
    height: 240,
};

#[rustfmt::skip]
const PROJECTION: Matrix34 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

fn pose(x: f32, y: f32) -> Matrix34 {
    [[1.0, 0.0, 0.0, x], [0.0, 1.0, 0.0, y], [0.0, 0.0, 1.0, 1.0]]
}

// the marker pasted at `origin` over a black background
fn render(marker: &[u8], origin: [i64; 2]) -> Image<u8, 1> {
    Image::from_size_fn(FRAME_SIZE, |u, v| {
        let (x, y) = (u as i64 - origin[0], v as i64 - origin[1]);
        let inside = (0..MARKER_SIZE.width as i64).contains(&x)
            && (0..MARKER_SIZE.height as i64).contains(&y);
        if inside {
            marker[y as usize * MARKER_SIZE.width + x as usize]
        } else {
            0
        }
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match args.config {
        Some(path) => TrackerConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => TrackerConfig::default(),
    };
    config.debug |= args.debug;

    // random texture, so every feature window is unique
    let mut rng = rand::rng();
    let marker = (0..MARKER_SIZE.area())
        .map(|_| rng.random::<u8>())
        .collect::<Vec<_>>();

    let points = (20..MARKER_SIZE.height - 20)
        .step_by(16)
        .flat_map(|y| {
            (20..MARKER_SIZE.width - 20)
                .step_by(16)
                .map(move |x| FeaturePoint::new(x as f32, y as f32))
        })
        .collect::<Vec<_>>();

    let dataset = TargetDataset {
        keyframes: vec![KeyframeData {
            points,
            pixels: marker.clone(),
            width: MARKER_SIZE.width,
            height: MARKER_SIZE.height,
            scale: 1.0,
        }],
    };

    let mut tracker = Tracker::new(
        vec![MARKER_SIZE],
        &[dataset],
        PROJECTION,
        FRAME_SIZE,
        config,
    )?;

    let mut origin = [80i64, 60i64];
    tracker.dummy_run(&render(&marker, origin))?;

    // the prior pose starts at the true location and lags one frame behind
    let mut prior = [origin[0] as f32, origin[1] as f32];

    for frame_id in 0..args.num_frames {
        origin = [origin[0] + args.step_x, origin[1] + args.step_y];
        let frame = render(&marker, origin);

        let result = tracker.track(&frame, &pose(prior[0], prior[1]), 0)?;
        if result.is_empty() {
            log::warn!("frame {frame_id}: target lost");
            continue;
        }

        // translation-only update in place of a full pose solver
        let n = result.len() as f32;
        let (mut dx, mut dy) = (0.0, 0.0);
        for (world, screen) in result.world_coords.iter().zip(result.screen_coords.iter()) {
            dx += screen[0] - world[0];
            dy += screen[1] - world[1];
        }
        prior = [dx / n, dy / n];

        log::info!(
            "frame {frame_id}: {} correspondences, marker at ({:.1}, {:.1}), truth ({}, {})",
            result.len(),
            prior[0],
            prior[1],
            origin[0],
            origin[1]
        );

        if let Some(debug) = &result.debug {
            log::debug!(
                "frame {frame_id}: {} of {} features above threshold",
                debug.good_track.len(),
                debug.similarities.len()
            );
        }
    }

    log::info!(
        "compiled {} kernels, peak device memory {} bytes",
        tracker.kernel_cache().num_compiled(),
        tracker.device().peak_bytes()
    );

    Ok(())
}
