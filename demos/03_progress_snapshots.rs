use neural_style as ns;

fn main() -> Result<(), ns::Error> {
    tracing_subscriber::fmt::init();

    let extractor = ns::FeatureExtractor::<ns::DefaultBackend>::load(
        &ns::ExtractorConfig {
            weights_path: Some("models/vgg19".into()),
            ..Default::default()
        },
        &Default::default(),
    )?;

    let session = ns::Session::builder()
        .content(&"imgs/modern.jpg")
        .style(&"imgs/historical.jpg")
        .max_dimension(256)
        .erode_content(true)
        .build(&extractor)?;

    std::fs::create_dir_all("out/03")?;

    // save the canvas at the end of every epoch
    let progress = |update: ns::ProgressUpdate<'_>| {
        println!(
            "{} epoch {} ({}/{} steps), loss {:.2}",
            update.phase, update.epoch, update.total.current, update.total.total, update.losses.total
        );

        let path = format!("out/03/{}_{:02}.png", update.phase, update.epoch);
        if let Err(err) = update.image.save(&path) {
            eprintln!("failed to save snapshot {}: {}", path, err);
        }
    };

    session.run(Some(Box::new(progress)))?.save("out/03.png")
}
