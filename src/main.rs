use dicom_derivation::{DerivationConverter, FrameLoader, FrameRecord, ReconstructionOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = ReconstructionOptions::default();
    let objects =
        FrameLoader::load_from_directory("dicom").expect("should have loaded files from directory");
    let candidates = FrameLoader::descriptors(&objects);
    let converter = DerivationConverter::new(options);

    let stack = match objects.iter().find(|object| object.number_of_frames().is_some()) {
        Some(source) => FrameLoader::stack_from_object(source),
        None => FrameLoader::stack_from_single_frames(
            &objects,
            converter.options().orientation_tolerance,
        )
        .expect("should have built a stack from single-frame objects"),
    };

    let conversion = converter
        .convert(&stack, &candidates)
        .expect("should have reconstructed the volume geometry");

    info!("Origin: {:?}", conversion.geometry.origin);
    info!("Spacing: {:?}", conversion.geometry.spacing);
    info!("Extent: {:?}", conversion.geometry.extent);
    for series in conversion.series_index.series() {
        info!(
            "Series {}: {} referenced instances",
            series.series_uid,
            series.instances.len()
        );
    }
}
