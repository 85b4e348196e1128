use neural_style as ns;

fn main() -> Result<(), ns::Error> {
    // load the pretrained network, this is the only state shared between renders
    let extractor = ns::FeatureExtractor::<ns::DefaultBackend>::load(
        &ns::ExtractorConfig {
            weights_path: Some("models/vgg19".into()),
            ..Default::default()
        },
        &Default::default(),
    )?;

    let session = ns::Session::builder()
        // the layout of this image is kept
        .content(&"imgs/modern.jpg")
        // the texture and colors of this one are transferred
        .style(&"imgs/historical.jpg")
        .max_dimension(256)
        .build(&extractor)?;

    // render "modern.jpg" in the style of "historical.jpg"
    let rendered = session.run(None)?;

    // save the result to the disk
    rendered.save("out/01.png")
}
