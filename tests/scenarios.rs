use approx::assert_relative_eq;
use posetree::{
    Point3, Pose3d, PoseError, PoseId, PoseOriginList, PoseTree, Rotation3d,
    RotationMatrix3d, Transform3d, Vector3,
};
use rstest::rstest;
use uom::si::angle::{degree, radian};
use uom::si::f64::Angle;

fn d(degrees: f64) -> Angle {
    Angle::new::<degree>(degrees)
}

#[test]
fn copies_get_a_new_identity() {
    let tree = PoseTree::new();
    let origin = Pose3d::new_root(&tree, "O");
    let mut a = Pose3d::with_parent(
        Transform3d::new(
            Rotation3d::from_axis_angle(d(30.), &Vector3::z()),
            Vector3::new(10., 20., 30.),
        ),
        &origin,
        "A",
    );
    a.set_id(PoseId(17));

    let a2 = a.clone();
    assert_ne!(a2.id(), a.id());
    assert_eq!(a2.id(), PoseId::UNOWNED);
    assert_eq!(a2.name(), format!("{}_COPY", a.name()));
    assert_eq!(a2.translation(), a.translation());
    assert_eq!(a2.rotation(), a.rotation());
    assert!(a2.is_child_of(&origin));

    let moved = a;
    assert_eq!(moved.id(), PoseId(17));
    assert_eq!(moved.name(), "A");
}

#[test]
fn quarter_turn_about_x_maps_y_to_z() {
    let r = RotationMatrix3d::from_axis_angle(d(90.), &Vector3::x());
    assert_relative_eq!(r * Point3::new(0., 1., 0.), Point3::new(0., 0., 1.), epsilon = 1e-6);
}

#[rstest]
#[case(Vector3::new(10., 20., 30.), d(30.), Vector3::z())]
#[case(Vector3::new(-5., 0., 2.), d(-120.), Vector3::new(1., 1., 0.))]
#[case(Vector3::zeros(), d(179.), Vector3::new(0.2, -1., 0.4))]
fn pose_times_inverse_is_identity(
    #[case] translation: Vector3,
    #[case] angle: Angle,
    #[case] axis: Vector3,
) {
    let tree = PoseTree::new();
    let p = Pose3d::new(
        &tree,
        Transform3d::new(Rotation3d::from_axis_angle(angle, &axis), translation),
        "P",
    );
    let inverse = p.inverse();
    for product in [&p * &inverse, &inverse * &p] {
        assert_relative_eq!(product.translation(), Vector3::zeros(), epsilon = 1e-5);
        assert!(product.rotation().angle().get::<radian>() < 1e-5);
    }
}

#[test]
fn different_origins_never_match() {
    let mut origins = PoseOriginList::default();
    origins.add_new_origin().unwrap();
    let in_first = Pose3d::with_parent(
        Transform3d::identity(),
        origins.current_origin().unwrap(),
        "first",
    );
    origins.add_new_origin().unwrap();
    let in_second = Pose3d::with_parent(
        Transform3d::identity(),
        origins.current_origin().unwrap(),
        "second",
    );

    assert_eq!(
        in_first.get_with_respect_to(&in_second).map(|p| p.name()),
        Err(PoseError::NoCommonOrigin)
    );
    assert!(!in_first.is_same_as(&in_second, f64::MAX, d(180.)));
    assert!(!in_second.is_same_as(&in_first, f64::MAX, d(180.)));
}

#[test]
fn rejigger_is_exact_and_relates_old_poses() {
    let mut origins = PoseOriginList::default();
    let old_world = origins.add_new_origin().unwrap();
    let block = Pose3d::with_parent(
        Transform3d::from_translation(Vector3::new(200., 0., 0.)),
        origins.current_origin().unwrap(),
        "block",
    );

    let new_world = origins.add_new_origin().unwrap();
    let robot = Pose3d::with_parent(
        Transform3d::from_translation(Vector3::new(0., 10., 0.)),
        origins.current_origin().unwrap(),
        "robot",
    );

    let correction = Transform3d::new(
        Rotation3d::from_axis_angle(d(-17.), &Vector3::new(0.1, 0.2, 1.)),
        Vector3::new(33.3, -12.5, 0.25),
    );
    origins.rejigger(old_world, correction).unwrap();
    assert_eq!(origins.current_origin_id(), old_world);

    let rejiggered = origins.origin_by_id(new_world).unwrap();
    let world = origins.origin_by_id(old_world).unwrap();
    assert_eq!(rejiggered.get_with_respect_to(world).unwrap().transform(), correction);

    // the robot can now see the block
    let block_from_robot = block.get_with_respect_to(&robot).unwrap();
    let robot_in_world = robot.get_with_respect_to(world).unwrap();
    let roundtrip = &robot_in_world * &block_from_robot;
    assert_relative_eq!(roundtrip.translation(), Vector3::new(200., 0., 0.), epsilon = 1e-9);
    assert_eq!(origins.origin_id_of(&robot), old_world);
    assert_eq!(origins.origin_id_of(&block), old_world);
}

#[test]
fn rejigger_then_flatten_chain() {
    let mut origins = PoseOriginList::default();
    let first = origins.add_new_origin().unwrap();
    let mut previous = first;
    for _ in 0..3 {
        let next = origins.add_new_origin().unwrap();
        origins
            .rejigger(previous, Transform3d::from_translation(Vector3::new(1., 0., 0.)))
            .unwrap();
        previous = next;
    }
    let last = previous;

    // 4 -> 3 -> 2 -> 1, each one unit further along x
    assert_eq!(origins.origin_by_id(last).unwrap().depth(), Ok(3));
    let marker = Pose3d::with_parent(
        Transform3d::from_translation(Vector3::new(0., 0., 1.)),
        origins.origin_by_id(last).unwrap(),
        "marker",
    );

    assert_eq!(origins.flatten(first), Ok(2));
    let world = origins.origin_by_id(first).unwrap();
    for (id, origin) in origins.iter() {
        if id != first {
            assert!(origin.is_child_of(world), "{origin}");
        }
    }
    assert_eq!(
        origins.origin_by_id(last).unwrap().translation(),
        Vector3::new(3., 0., 0.)
    );
    assert_eq!(
        marker.get_with_respect_to(world).unwrap().translation(),
        Vector3::new(3., 0., 1.)
    );
    origins.sanity_check().unwrap();
}

#[test]
fn origin_list_teardown_with_outstanding_poses() {
    let tree = PoseTree::new();
    let block;
    {
        let mut origins = PoseOriginList::new(&tree);
        let a = origins.add_new_origin().unwrap();
        origins.add_new_origin().unwrap();
        block = Pose3d::with_parent(
            Transform3d::identity(),
            origins.current_origin().unwrap(),
            "block",
        );
        origins.rejigger(a, Transform3d::identity()).unwrap();
    }
    assert!(matches!(
        block.find_root(),
        Err(PoseError::UnownedParent { .. })
    ));
    drop(block);
    assert!(tree.is_empty());
}
