use neural_style as ns;

fn main() -> Result<(), ns::Error> {
    tracing_subscriber::fmt::init();

    let config = ns::RenderConfig {
        extractor: ns::ExtractorConfig {
            weights_path: Some("models/vgg19".into()),
            ..Default::default()
        },
        max_dimension: 256,
        // at most 2 renders are in flight at once
        max_concurrent_renders: Some(2),
        ..Default::default()
    };

    let extractor =
        ns::FeatureExtractor::<ns::DefaultBackend>::load(&config.extractor, &Default::default())?;
    let pool = ns::RenderPool::new(extractor, config)?;

    let contents = [
        ("modern", "imgs/modern.jpg"),
        ("street", "imgs/street.jpg"),
        ("portrait", "imgs/portrait.jpg"),
    ];

    let jobs = contents
        .iter()
        .map(|(id, path)| {
            ns::RenderJob::new(*id)
                .content(path)
                .style(&"imgs/historical.jpg")
        })
        .collect();

    // each finished render is written to out/04/<id>.png
    let sink = ns::DirectorySink::new("out/04");
    for ((id, _), result) in contents.iter().zip(pool.run(jobs, &sink)) {
        match result {
            Ok(()) => println!("{} rendered", id),
            Err(err) => eprintln!("{} failed: {}", id, err),
        }
    }

    Ok(())
}
