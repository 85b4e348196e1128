use neural_style as ns;

fn main() -> Result<(), ns::Error> {
    // every parameter, including the default images, comes from the file
    let config = ns::RenderConfig::from_json_file("demos/render.json")?;

    let extractor =
        ns::FeatureExtractor::<ns::DefaultBackend>::load(&config.extractor, &Default::default())?;

    // no images are given, so the configured defaults are used
    let session = ns::SessionBuilder::from_config(&config)
        .content_weight(150.0)
        .build(&extractor)?;

    session.run(None)?.save("out/02.png")
}
