// Turns the raw OD matrices read back from the engine into impedances for the demand model.
use std::collections::BTreeMap;

use ndarray::prelude::*;
use ndarray::Zip;

use super::matrices::UNREACHABLE;
use super::AssignmentClass;
use super::AssignmentError;
use super::ImpedanceType;

/// Upper bound of bicycle travel time.  Kept well below UNREACHABLE.
pub static BIKE_TIME_CAP: f64 = 9999.;

pub type ClassMatrices = BTreeMap<AssignmentClass, Array2<f64>>;
pub type ImpedanceMatrices = BTreeMap<ImpedanceType, ClassMatrices>;


/// Raw engine output for one time period.
pub struct RawImpedance {
    pub matrices: ImpedanceMatrices,
    // generalized cost of the car classes
    pub gen_cost: ClassMatrices,
    // actual first waiting time of the transit classes
    pub first_wait: ClassMatrices,
}

/// The value of time and cost parameters needed to post-process one class.
pub struct ImpedanceProcessor {
    pub dist_unit_cost: f64,
    pub waiting_time_perception_factor: f64,
    // inverse value of time (min/eur) of each car class
    pub vot_inv: BTreeMap<AssignmentClass, f64>,
}

impl ImpedanceProcessor {
    /// Applies, in order: unreachable normalization, the bicycle time cap, car time recovery
    /// from generalized cost, first wait damping and, outside the last iteration, aliasing of
    /// the leisure transit impedance to the work impedance with car distance costs added.
    ///
    /// OD pairs found unreachable stay at UNREACHABLE in every matrix of their class.
    pub fn process(&self, raw: RawImpedance, is_last_iteration: bool)
                   -> Result<ImpedanceMatrices, AssignmentError> {
        let RawImpedance {mut matrices, gen_cost, first_wait} = raw;
        let unreachable = normalize_unreachable(&mut matrices);

        let times = get_mut(&mut matrices, ImpedanceType::Time)?;
        if let Some(bike_time) = times.get_mut(&AssignmentClass::Bike) {
            cap_time(bike_time, BIKE_TIME_CAP);
        }

        for class in AssignmentClass::car_classes().iter() {
            let (gcost, vot_inv) = match (gen_cost.get(class), self.vot_inv.get(class)) {
                (Some(gcost), Some(vot_inv)) => (gcost, *vot_inv),
                _ => continue,
            };
            let cost = get_class(&matrices, ImpedanceType::Cost, *class)?;
            let dist = get_class(&matrices, ImpedanceType::Dist, *class)?;
            let mut time = extract_time_from_gcost(gcost, cost, dist, vot_inv,
                                                   self.dist_unit_cost);
            if let Some(mask) = unreachable.get(class) {
                Zip::from(&mut time).and(mask).for_each(|tt, &unr| if unr { *tt = UNREACHABLE });
            }
            get_mut(&mut matrices, ImpedanceType::Time)?.insert(*class, time);
        }

        let damped_classes: &[AssignmentClass] = match is_last_iteration {
            true => &[AssignmentClass::TransitWork, AssignmentClass::TransitLeisure],
            false => &[AssignmentClass::TransitWork],
        };
        for class in damped_classes {
            let fwt = match first_wait.get(class) {
                Some(fwt) => fwt,
                None => continue,
            };
            let times = get_mut(&mut matrices, ImpedanceType::Time)?;
            if let Some(time) = times.get_mut(class) {
                damp_first_wait(time, fwt, self.waiting_time_perception_factor)?;
                if let Some(mask) = unreachable.get(class) {
                    Zip::from(time).and(mask).for_each(|tt, &unr| if unr { *tt = UNREACHABLE });
                }
            }
        }

        if !is_last_iteration {
            // leisure transit is not assigned separately before the last iteration
            for (_, class_mtxs) in matrices.iter_mut() {
                if let Some(work) = class_mtxs.get(&AssignmentClass::TransitWork) {
                    let work = work.clone();
                    class_mtxs.insert(AssignmentClass::TransitLeisure, work);
                }
            }
            for class in AssignmentClass::car_classes().iter() {
                let dist = get_class(&matrices, ImpedanceType::Dist, *class)?.clone();
                let costs = get_mut(&mut matrices, ImpedanceType::Cost)?;
                if let Some(cost) = costs.get_mut(class) {
                    let mask = unreachable.get(class);
                    add_distance_cost(cost, &dist, self.dist_unit_cost, mask);
                }
            }
        }

        return Ok(matrices);
    }
}

fn get_mut(matrices: &mut ImpedanceMatrices, imp_type: ImpedanceType)
           -> Result<&mut ClassMatrices, AssignmentError> {
    matrices.get_mut(&imp_type).ok_or_else(|| AssignmentError::UnknownMatrix(
        format!("{} impedance", imp_type.as_str())))
}

fn get_class(matrices: &ImpedanceMatrices, imp_type: ImpedanceType, class: AssignmentClass)
             -> Result<&Array2<f64>, AssignmentError> {
    match matrices.get(&imp_type).and_then(|mtxs| mtxs.get(&class)) {
        Some(mtx) => Ok(mtx),
        None => Err(AssignmentError::UnknownMatrix(
            format!("{} impedance of {}", imp_type.as_str(), class.as_str()))),
    }
}

/// For OD pairs whose time reaches UNREACHABLE, sets time, distance and cost of that class to
/// UNREACHABLE.  Returns the unreachable mask of every class that has a time matrix.
pub fn normalize_unreachable(matrices: &mut ImpedanceMatrices)
                             -> BTreeMap<AssignmentClass, Array2<bool>> {
    let mut masks = BTreeMap::new();
    if let Some(times) = matrices.get(&ImpedanceType::Time) {
        for (class, time) in times {
            masks.insert(*class, time.mapv(|tt| tt >= UNREACHABLE));
        }
    }
    for (_, class_mtxs) in matrices.iter_mut() {
        for (class, mtx) in class_mtxs.iter_mut() {
            if let Some(mask) = masks.get(class) {
                Zip::from(mtx).and(mask).for_each(|vv, &unr| if unr { *vv = UNREACHABLE });
            }
        }
    }
    return masks;
}

/// Clips times to cap.  Unreachable pairs then show up as the cap.
pub fn cap_time(time: &mut Array2<f64>, cap: f64) {
    time.par_mapv_inplace(|tt| tt.min(cap));
}

/// Travel time is the generalized cost minus the monetary cost converted to minutes.
pub fn extract_time_from_gcost(gen_cost: &Array2<f64>, cost: &Array2<f64>, dist: &Array2<f64>,
                               vot_inv: f64, dist_unit_cost: f64) -> Array2<f64> {
    let mut time = gen_cost.clone();
    Zip::from(&mut time).and(cost).and(dist).par_for_each(|tt, &cc, &dd| {
        *tt -= vot_inv * (cc + dist_unit_cost * dd);
    });
    return time;
}

/// Replaces the linear first wait perception of the assignment with a concave one:
/// time + weight * ((5/3 * first_wait)^0.8 - first_wait).
pub fn damp_first_wait(time: &mut Array2<f64>, first_wait: &Array2<f64>, weight: f64)
                       -> Result<(), AssignmentError> {
    if time.dim() != first_wait.dim() {
        return Err(AssignmentError::InvalidInput(
            format!("first wait matrix is {:?} but time matrix is {:?}", first_wait.dim(),
                    time.dim())));
    }
    Zip::from(time).and(first_wait).par_for_each(|tt, &fw| {
        *tt += weight * ((5. / 3. * fw).powf(0.8) - fw);
    });
    return Ok(());
}

fn add_distance_cost(cost: &mut Array2<f64>, dist: &Array2<f64>, dist_unit_cost: f64,
                     unreachable: Option<&Array2<bool>>) {
    match unreachable {
        Some(mask) => Zip::from(cost).and(dist).and(mask).for_each(|cc, &dd, &unr| {
            if !unr {
                *cc += dist_unit_cost * dd;
            }
        }),
        None => Zip::from(cost).and(dist).for_each(|cc, &dd| *cc += dist_unit_cost * dd),
    }
}


#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use approx::assert_ulps_eq;
    use ndarray::array;

    use super::*;
    use super::super::test_utils::assert_matrices_close;

    fn processor() -> ImpedanceProcessor {
        let mut vot_inv = BTreeMap::new();
        vot_inv.insert(AssignmentClass::CarWork, 6.);
        vot_inv.insert(AssignmentClass::CarLeisure, 4.);
        ImpedanceProcessor {dist_unit_cost: 0.1, waiting_time_perception_factor: 1.5, vot_inv}
    }

    fn filled(value: f64) -> Array2<f64> {
        Array2::from_elem((2, 2), value)
    }

    fn raw_impedance() -> RawImpedance {
        let mut matrices = ImpedanceMatrices::new();
        for imp_type in ImpedanceType::all().iter() {
            let mut class_mtxs = ClassMatrices::new();
            for class in &[AssignmentClass::CarWork, AssignmentClass::CarLeisure,
                           AssignmentClass::TransitWork, AssignmentClass::TransitLeisure] {
                class_mtxs.insert(*class, filled(10.));
            }
            if *imp_type != ImpedanceType::Cost {
                class_mtxs.insert(AssignmentClass::Bike, filled(20.));
            }
            matrices.insert(*imp_type, class_mtxs);
        }
        let mut gen_cost = ClassMatrices::new();
        gen_cost.insert(AssignmentClass::CarWork, filled(100.));
        gen_cost.insert(AssignmentClass::CarLeisure, filled(100.));
        let mut first_wait = ClassMatrices::new();
        first_wait.insert(AssignmentClass::TransitWork, filled(6.));
        first_wait.insert(AssignmentClass::TransitLeisure, filled(0.));
        RawImpedance {matrices, gen_cost, first_wait}
    }

    #[test]
    fn test_unreachable_pairs_are_normalized() {
        let mut raw = raw_impedance();
        let times = raw.matrices.get_mut(&ImpedanceType::Time).unwrap();
        times.get_mut(&AssignmentClass::TransitWork).unwrap()[[0, 1]] = 1e7;
        times.get_mut(&AssignmentClass::CarWork).unwrap()[[1, 0]] = UNREACHABLE;
        raw.matrices.get_mut(&ImpedanceType::Dist).unwrap()
           .get_mut(&AssignmentClass::CarWork).unwrap()[[1, 0]] = 0.;

        for is_last in &[false, true] {
            let mut raw = RawImpedance {
                matrices: raw.matrices.clone(),
                gen_cost: raw.gen_cost.clone(),
                first_wait: raw.first_wait.clone(),
            };
            raw.first_wait.insert(AssignmentClass::TransitWork, filled(6.));
            let result = processor().process(raw, *is_last).unwrap();
            for imp_type in ImpedanceType::all().iter() {
                assert_eq!(result[imp_type][&AssignmentClass::TransitWork][[0, 1]], UNREACHABLE);
                assert_eq!(result[imp_type][&AssignmentClass::CarWork][[1, 0]], UNREACHABLE);
                // other pairs of the class are untouched by the sentinel
                assert!(result[imp_type][&AssignmentClass::CarWork][[0, 0]] < UNREACHABLE);
            }
        }
    }

    #[test]
    fn test_bike_time_is_capped() {
        let mut raw = raw_impedance();
        let times = raw.matrices.get_mut(&ImpedanceType::Time).unwrap();
        times.get_mut(&AssignmentClass::Bike).unwrap()[[0, 0]] = 50000.;
        times.get_mut(&AssignmentClass::Bike).unwrap()[[1, 1]] = 2e6;
        let result = processor().process(raw, true).unwrap();
        let bike_time = &result[&ImpedanceType::Time][&AssignmentClass::Bike];
        assert_eq!(bike_time[[0, 0]], BIKE_TIME_CAP);
        assert_eq!(bike_time[[0, 1]], 20.);
        assert_eq!(bike_time[[1, 1]], BIKE_TIME_CAP);
        // the unreachable bike pair keeps the sentinel in its distance
        assert_eq!(result[&ImpedanceType::Dist][&AssignmentClass::Bike][[1, 1]], UNREACHABLE);
    }

    #[test]
    fn test_car_time_from_generalized_cost() {
        let result = processor().process(raw_impedance(), true).unwrap();
        // 100 - 6 * (10 + 0.1 * 10)
        assert_ulps_eq!(result[&ImpedanceType::Time][&AssignmentClass::CarWork][[0, 0]], 34.);
        // 100 - 4 * (10 + 0.1 * 10)
        assert_ulps_eq!(result[&ImpedanceType::Time][&AssignmentClass::CarLeisure][[1, 1]], 56.);
        // last iteration costs are left alone
        assert_ulps_eq!(result[&ImpedanceType::Cost][&AssignmentClass::CarWork][[1, 1]], 10.);
    }

    #[test]
    fn test_damping() {
        let result = processor().process(raw_impedance(), true).unwrap();
        let expected = 10. + 1.5 * ((5. / 3. * 6. as f64).powf(0.8) - 6.);
        assert_relative_eq!(result[&ImpedanceType::Time][&AssignmentClass::TransitWork][[0, 0]],
                            expected, epsilon = 1e-12);
        // zero first wait leaves the time unchanged
        assert_eq!(result[&ImpedanceType::Time][&AssignmentClass::TransitLeisure][[0, 0]], 10.);
    }

    #[test]
    fn test_zero_first_wait_is_identity() {
        let mut time = array![[1., 2.], [3., 4.]];
        damp_first_wait(&mut time, &Array2::zeros((2, 2)), 1.5).unwrap();
        assert_matrices_close(&time, &array![[1., 2.], [3., 4.]], 1e-12);
        assert!(damp_first_wait(&mut time, &Array2::zeros((3, 3)), 1.5).is_err());
    }

    #[test]
    fn test_aliasing_before_last_iteration() {
        let mut raw = raw_impedance();
        raw.matrices.get_mut(&ImpedanceType::Dist).unwrap()
           .insert(AssignmentClass::TransitWork, filled(33.));
        let result = processor().process(raw, false).unwrap();
        for imp_type in ImpedanceType::all().iter() {
            assert_eq!(result[imp_type][&AssignmentClass::TransitLeisure],
                       result[imp_type][&AssignmentClass::TransitWork]);
        }
        assert_eq!(result[&ImpedanceType::Dist][&AssignmentClass::TransitLeisure][[1, 0]], 33.);
        // distance cost is added to the car costs
        assert_ulps_eq!(result[&ImpedanceType::Cost][&AssignmentClass::CarLeisure][[0, 1]], 11.);
    }
}
