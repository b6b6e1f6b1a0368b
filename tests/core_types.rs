use refmatch::features::{Descriptors, Keypoint};
use refmatch::lowlevel::{polygon_area, reference_corners};
use refmatch::{
    CaptureRegion, Features, ImageView, OwnedImage, RefMatchError, Reference, ReferenceSet,
};

#[test]
fn image_view_rejects_short_buffers() {
    let data = vec![0u8; 10];
    assert!(matches!(
        ImageView::from_slice(&data, 4, 3),
        Err(RefMatchError::BufferTooSmall { .. })
    ));
    assert!(ImageView::new(&data, 2, 2, 1).is_err());
}

#[test]
fn roi_view_shares_backing_buffer() {
    let data: Vec<u8> = (0..20).collect();
    let view = ImageView::from_slice(&data, 5, 4).unwrap();
    let roi = view.roi(1, 1, 3, 2).unwrap();
    assert_eq!(roi.get(0, 0), Some(&6));
    assert_eq!(roi.row(1), Some(&[11u8, 12, 13][..]));
    assert!(matches!(
        view.roi(3, 3, 3, 2),
        Err(RefMatchError::RoiOutOfBounds { .. })
    ));
}

#[test]
fn owned_image_paste_clips_at_borders() {
    let mut canvas = OwnedImage::filled(4, 4, 0).unwrap();
    let patch = OwnedImage::filled(3, 3, 9).unwrap();
    canvas.paste(patch.view(), 2, 2);
    assert_eq!(canvas.data()[2 * 4 + 2], 9);
    assert_eq!(canvas.data()[3 * 4 + 3], 9);
    assert_eq!(canvas.data()[4 + 1], 0);
}

#[test]
fn features_require_one_row_per_keypoint() {
    let kp = Keypoint {
        x: 1.0,
        y: 2.0,
        size: 7.0,
        angle_deg: 0.0,
        response: 1.0,
        octave: 0,
    };
    let rows = Descriptors::Binary {
        bytes_per_row: 32,
        data: vec![0; 64],
    };
    assert!(matches!(
        Features::new(vec![kp], rows.clone()),
        Err(RefMatchError::DescriptorMismatch { .. })
    ));
    let features = Features::new(vec![kp, kp], rows).unwrap();
    assert_eq!(features.descriptors().len(), 2);
    assert_eq!(features.descriptors().binary_row(1).map(<[u8]>::len), Some(32));
    assert!(features.descriptors().float_row(0).is_none());
}

#[test]
fn reference_set_preserves_order() {
    let refs = vec![
        Reference::new("first", OwnedImage::filled(8, 4, 1).unwrap()),
        Reference::new("second", OwnedImage::filled(6, 6, 2).unwrap()),
    ];
    let set = ReferenceSet::new(refs).unwrap();
    let names: Vec<&str> = set.iter().map(Reference::name).collect();
    assert_eq!(names, ["first", "second"]);
    assert_eq!(set.get(1).unwrap().size(), (6, 6));
}

#[test]
fn area_of_axis_aligned_quad_ignores_winding() {
    let quad = reference_corners(300, 200);
    assert_eq!(polygon_area(&quad), 60_000.0);
    let mut reversed = quad;
    reversed.reverse();
    assert_eq!(polygon_area(&reversed), 60_000.0);
}

#[test]
fn capture_region_for_default_display() {
    let region = CaptureRegion::centered(640, 480, 0.8, (16, 10)).unwrap();
    assert_eq!(
        (region.x, region.y, region.width, region.height),
        (64, 80, 512, 320)
    );
}
