use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use image::{GenericImageView, ImageFormat};
use serde::Serialize;

use crate::cmd::{close_on_interrupt, GrabArgs};
use crate::exit::{client_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_json, print_raw, OutputFormat};

#[derive(Debug, Serialize)]
struct FrameOutput {
    index: usize,
    size: usize,
    width: Option<u32>,
    height: Option<u32>,
    path: Option<PathBuf>,
}

pub fn run(args: GrabArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "count must be at least 1"));
    }

    let client = Arc::new(args.device.connect()?);
    let camera = client
        .camera()
        .map_err(|err| client_error("no camera", err))?;

    if args.count == 1 {
        let frame = camera
            .image()
            .map_err(|err| client_error("frame request failed", err))?;
        emit(&args, 0, &frame, format)?;
    } else {
        let interrupted = close_on_interrupt(&client)?;
        let mut stream = camera
            .stream()
            .map_err(|err| client_error("camera stream failed", err))?;
        let mut index = 0;
        while index < args.count {
            let Some(frame) = stream.next() else {
                break;
            };
            emit(&args, index, &frame, format)?;
            index += 1;
        }
        if index < args.count && !interrupted.load(Ordering::SeqCst) {
            if let Some(err) = stream.take_error() {
                return Err(client_error("camera stream ended", err));
            }
        }
        if interrupted.load(Ordering::SeqCst) {
            return Ok(SUCCESS);
        }
    }

    client
        .close()
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}

fn emit(args: &GrabArgs, index: usize, data: &[u8], format: OutputFormat) -> CliResult<()> {
    let (width, height) = if args.decode {
        let picture = image::load_from_memory_with_format(data, ImageFormat::Jpeg).map_err(|err| {
            CliError::new(DATA_INVALID, format!("frame {index} does not decode: {err}"))
        })?;
        let (width, height) = picture.dimensions();
        (Some(width), Some(height))
    } else {
        (None, None)
    };

    let path = match &args.output {
        Some(base) => {
            let path = frame_path(base, index, args.count);
            std::fs::write(&path, data)
                .map_err(|err| io_error(&format!("write {}", path.display()), err))?;
            Some(path)
        }
        None => None,
    };

    let out = FrameOutput {
        index,
        size: data.len(),
        width,
        height,
        path,
    };
    match format {
        OutputFormat::Raw if out.path.is_none() => print_raw(data),
        OutputFormat::Json => print_json(&out),
        _ => print_frame_line(&out),
    }
    Ok(())
}

fn print_frame_line(out: &FrameOutput) {
    let mut line = format!("frame {}: {} bytes", out.index, out.size);
    if let (Some(width), Some(height)) = (out.width, out.height) {
        line.push_str(&format!(", {width}x{height}"));
    }
    if let Some(path) = &out.path {
        line.push_str(&format!(" -> {}", path.display()));
    }
    println!("{line}");
}

/// `shot.jpg` stays as is for a single frame and becomes `shot-3.jpg` when
/// streaming.
fn frame_path(base: &Path, index: usize, count: usize) -> PathBuf {
    if count == 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    let name = match base.extension() {
        Some(ext) => format!("{stem}-{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{index}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_keeps_the_given_path() {
        assert_eq!(
            frame_path(Path::new("/tmp/shot.jpg"), 0, 1),
            PathBuf::from("/tmp/shot.jpg")
        );
    }

    #[test]
    fn streamed_frames_are_numbered() {
        assert_eq!(
            frame_path(Path::new("/tmp/shot.jpg"), 3, 5),
            PathBuf::from("/tmp/shot-3.jpg")
        );
        assert_eq!(
            frame_path(Path::new("out/raw"), 0, 2),
            PathBuf::from("out/raw-0")
        );
    }
}
