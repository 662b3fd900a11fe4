// Expansion of period results to a whole day, and the vehicle and transit kilometres driven.
use std::collections::BTreeMap;
use std::collections::HashMap;

use super::link_volume_attribute;
use super::AssignmentClass;
use super::AssignmentError;
use super::Network;
use super::TransitNetworkResults;

/// Network totals of the per-class transit results.
pub static TRANSIT_VOLUME: &str = "@transit_vol";
pub static TRANSIT_BOARDINGS: &str = "@transit_boa";
pub static TRANSIT_TRANSFER_BOARDINGS: &str = "@transit_trb";

// volume-delay functions of links that count towards vehicle kilometres.  Bus lane links use
// the function number plus 5.
static KM_VDFS: [u32; 5] = [1, 2, 3, 4, 5];

static TRANSIT_MODE_GROUPS: [(&str, &str); 5] = [
    ("bus", "bde"),
    ("trunk", "g"),
    ("metro", "m"),
    ("train", "rj"),
    ("tram", "tp"),
];
static OTHER_TRANSIT: &str = "other";


/// Sums a link attribute over periods, each weighted by its expansion factor.  Links are
/// matched by their end nodes.
pub fn sum_link_volumes(periods: &[(&Network, f64)], attribute: &str)
                        -> HashMap<(u32, u32), f64> {
    let mut day_volumes = HashMap::new();
    for (network, factor) in periods {
        for (inode, jnode, link) in network.links() {
            *day_volumes.entry((inode, jnode)).or_insert(0.) += link.volume(attribute) * factor;
        }
    }
    return day_volumes;
}

/// Links missing from the volumes get zero.
pub fn set_link_volumes(network: &mut Network, attribute: &str,
                        volumes: &HashMap<(u32, u32), f64>) {
    for (inode, jnode, link) in network.links_mut() {
        let volume = match volumes.get(&(inode, jnode)) {
            Some(vol) => *vol,
            None => 0.,
        };
        link.set_volume(attribute, volume);
    }
}

/// Sums a transit segment attribute over periods.  Segments are matched by line id and their
/// position along the line.
pub fn sum_segment_volumes(periods: &[(&Network, f64)], attribute: &str)
                           -> HashMap<(String, usize), f64> {
    let mut day_volumes = HashMap::new();
    for (network, factor) in periods {
        for line in network.transit_lines() {
            for (ii, segment) in line.segments.iter().enumerate() {
                *day_volumes.entry((line.id.clone(), ii)).or_insert(0.) +=
                    segment.volume(attribute) * factor;
            }
        }
    }
    return day_volumes;
}

pub fn set_segment_volumes(network: &mut Network, attribute: &str,
                           volumes: &HashMap<(String, usize), f64>) {
    for line in network.transit_lines_mut() {
        for (ii, segment) in line.segments.iter_mut().enumerate() {
            let volume = match volumes.get(&(line.id.clone(), ii)) {
                Some(vol) => *vol,
                None => 0.,
            };
            segment.set_volume(attribute, volume);
        }
    }
}

/// Totals the per-class segment results of the given transit classes: boardings on the
/// segment's start node and passengers on its link.  Earlier totals are overwritten.
pub fn sum_transit_results(network: &mut Network, classes: &[AssignmentClass]) {
    let mut boardings: HashMap<u32, (f64, f64)> = HashMap::new();
    let mut volumes: HashMap<(u32, u32), f64> = HashMap::new();
    for line in network.transit_lines() {
        for segment in &line.segments {
            for class in classes {
                let names = TransitNetworkResults::for_class(*class);
                let node_sums = boardings.entry(segment.i_node).or_insert((0., 0.));
                node_sums.0 += segment.volume(&names.total_boardings);
                node_sums.1 += segment.volume(&names.transfer_boardings);
                *volumes.entry((segment.i_node, segment.j_node)).or_insert(0.) +=
                    segment.volume(&names.transit_volumes);
            }
        }
    }

    for node in network.nodes_mut() {
        let (total, transfers) = match boardings.get(&node.number) {
            Some(sums) => *sums,
            None => (0., 0.),
        };
        node.set_volume(TRANSIT_BOARDINGS, total);
        node.set_volume(TRANSIT_TRANSFER_BOARDINGS, transfers);
    }
    set_link_volumes(network, TRANSIT_VOLUME, &volumes);
}


/// Period to day expansion factors of the kilometre totals.
#[derive(PartialEq, Debug, Clone)]
pub struct KmFactors {
    pub car: f64,
    pub van: f64,
    pub truck: f64,
    pub trailer_truck: f64,
    // transit departures, all modes
    pub bus: f64,
}

impl KmFactors {
    fn freight(&self, class: AssignmentClass) -> f64 {
        match class {
            AssignmentClass::Van => self.van,
            AssignmentClass::Truck => self.truck,
            _ => self.trailer_truck,
        }
    }
}

/// Day totals of vehicle kilometres by class and volume-delay function, and of transit
/// vehicle kilometres and minutes by mode group.
#[derive(PartialEq, Debug, Clone)]
pub struct NetworkKms {
    pub vehicle_kms: BTreeMap<String, BTreeMap<u32, f64>>,
    pub transit_dists: BTreeMap<String, f64>,
    pub transit_times: BTreeMap<String, f64>,
}

impl NetworkKms {
    pub fn new() -> NetworkKms {
        let mut vehicle_kms = BTreeMap::new();
        let freight = AssignmentClass::freight_classes();
        for name in freight.iter().map(|class| class.as_str()).chain(Some("car")) {
            let by_vdf: BTreeMap<u32, f64> = KM_VDFS.iter().map(|vdf| (*vdf, 0.)).collect();
            vehicle_kms.insert(String::from(name), by_vdf);
        }
        let mut transit_dists = BTreeMap::new();
        let groups = TRANSIT_MODE_GROUPS.iter().map(|(name, _)| *name);
        for name in groups.chain(Some(OTHER_TRANSIT)) {
            transit_dists.insert(String::from(name), 0.);
        }
        let transit_times = transit_dists.clone();
        return NetworkKms {vehicle_kms, transit_dists, transit_times};
    }

    /// Adds the kilometres of one period's assigned network.  Car volumes are the auto volume
    /// less the freight volumes.
    pub fn add_period(&mut self, network: &Network, factors: &KmFactors)
                      -> Result<(), AssignmentError> {
        for (_, _, link) in network.links() {
            let vdf = match link.volume_delay_func {
                ff if ff <= 5 => ff,
                ff => ff - 5,
            };
            if !KM_VDFS.contains(&vdf) {
                continue;
            }
            let mut car_volume = link.auto_volume;
            for class in AssignmentClass::freight_classes().iter() {
                let volume = link.volume(&link_volume_attribute(*class));
                add_km(&mut self.vehicle_kms, class.as_str(), vdf,
                       factors.freight(*class) * volume * link.length_km);
                car_volume -= volume;
            }
            add_km(&mut self.vehicle_kms, "car", vdf, factors.car * car_volume * link.length_km);
        }

        for line in network.transit_lines() {
            if line.headway <= 0. {
                return Err(AssignmentError::InvalidInput(
                    format!("line {} has headway {}", line.id, line.headway)));
            }
            let group = TRANSIT_MODE_GROUPS.iter().find(|(_, modes)| modes.contains(line.mode));
            let group = match group {
                Some((name, _)) => *name,
                None => OTHER_TRANSIT,
            };
            let departures = factors.bus * 60. / line.headway;
            for segment in &line.segments {
                let length = match network.link(segment.i_node, segment.j_node) {
                    Some(link) => link.length_km,
                    None => return Err(AssignmentError::InvalidInput(
                        format!("line {} runs on missing link {}-{}", line.id, segment.i_node,
                                segment.j_node))),
                };
                *self.transit_dists.entry(String::from(group)).or_insert(0.) +=
                    departures * length;
                *self.transit_times.entry(String::from(group)).or_insert(0.) +=
                    departures * segment.base_time;
            }
        }
        return Ok(());
    }
}

fn add_km(kms: &mut BTreeMap<String, BTreeMap<u32, f64>>, name: &str, vdf: u32, km: f64) {
    *kms.entry(String::from(name)).or_insert_with(BTreeMap::new).entry(vdf).or_insert(0.) += km;
}
