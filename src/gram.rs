use burn::tensor::{backend::Backend, Tensor};

/// Channel correlations of an activation, averaged over spatial locations.
///
/// For an activation of shape `(batch, channels, height, width)` this returns
/// a `(batch, channels, channels)` tensor where entry `[b, c, d]` is the mean
/// over every location of `a[b, c, y, x] * a[b, d, y, x]`. Averaging rather
/// than summing keeps layers of different resolution comparable.
pub fn gram_matrix<B: Backend>(activation: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, channels, height, width] = activation.dims();
    let locations = height * width;

    let features = activation.reshape([batch, channels, locations]);
    features
        .clone()
        .matmul(features.transpose())
        .div_scalar(locations as f32)
}

#[cfg(test)]
mod test {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type B = NdArray<f32>;

    #[test]
    fn symmetric() {
        let device = Default::default();
        let activation = Tensor::<B, 4>::random([2, 5, 7, 3], Distribution::Default, &device);

        let gram = gram_matrix(activation);
        assert_eq!(gram.dims(), [2, 5, 5]);

        let a = gram.clone().into_data().to_vec::<f32>().unwrap();
        let b = gram.transpose().into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5, "{} != {}", x, y);
        }
    }

    #[test]
    fn averages_over_locations() {
        let device = Default::default();
        // 2 channels over 2 locations: c0 = [1, 3], c1 = [2, 4]
        let activation = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 3.0, 2.0, 4.0], [1, 2, 1, 2]),
            &device,
        );

        let gram = gram_matrix(activation)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        // [(1 + 9) / 2, (2 + 12) / 2; (2 + 12) / 2, (4 + 16) / 2]
        assert_eq!(gram, vec![5.0, 7.0, 7.0, 10.0]);
    }

    #[test]
    fn independent_of_spatial_arrangement() {
        let device = Default::default();
        let a = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], [1, 2, 2, 2]),
            &device,
        );
        // same per-location feature vectors, locations shuffled
        let b = Tensor::<B, 4>::from_data(
            TensorData::new(vec![4.0f32, 3.0, 2.0, 1.0, 8.0, 7.0, 6.0, 5.0], [1, 2, 2, 2]),
            &device,
        );

        let ga = gram_matrix(a).into_data().to_vec::<f32>().unwrap();
        let gb = gram_matrix(b).into_data().to_vec::<f32>().unwrap();
        assert_eq!(ga, gb);
    }
}
