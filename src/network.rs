// this file defines an owned snapshot of one assignment scenario's network.  Links live in a
// petgraph graph keyed by node number; transit lines refer to links by their end nodes.
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use petgraph::graphmap::DiGraphMap;

use super::AssignmentError;


#[derive(PartialEq, Debug, Clone)]
pub struct Node {
    pub number: u32,
    // fare zone the node belongs to
    pub label: String,
    pub is_centroid: bool,
    // general purpose node tag, used as the boarding cost when tracing fare zone visits
    pub data1: f64,
    // named node results, e.g. "@transit_boa"
    pub volumes: HashMap<String, f64>,
}

impl Node {
    pub fn new(number: u32, label: &str, is_centroid: bool) -> Node {
        return Node {
            number,
            label: String::from(label),
            is_centroid,
            data1: 0.,
            volumes: HashMap::new(),
        };
    }

    pub fn volume(&self, attribute: &str) -> f64 {
        match self.volumes.get(attribute) {
            Some(vol) => *vol,
            None => 0.,
        }
    }

    pub fn set_volume(&mut self, attribute: &str, volume: f64) {
        self.volumes.insert(String::from(attribute), volume);
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct Link {
    pub length_km: f64,
    pub volume_delay_func: u32,
    // road charge in eur/km
    pub toll_rate: f64,
    pub toll_cost: f64,
    pub total_cost: f64,
    // transit departures per hour using the link
    pub bus_frequency: f64,
    pub background_traffic: f64,
    // congested car travel time in minutes, written by the car assignment
    pub auto_time: f64,
    // total volume of all car and freight classes, written by the car assignment
    pub auto_volume: f64,
    // encodes tram speeds of all three time periods as digit pairs, e.g. 151820
    pub tram_speed_code: f64,
    // named link volumes written by assignments, e.g. "@truck" or "@bike_aht"
    pub volumes: HashMap<String, f64>,
}

impl Link {
    pub fn new(length_km: f64, volume_delay_func: u32) -> Link {
        return Link {
            length_km,
            volume_delay_func,
            toll_rate: 0.,
            toll_cost: 0.,
            total_cost: 0.,
            bus_frequency: 0.,
            background_traffic: 0.,
            auto_time: 0.,
            auto_volume: 0.,
            tram_speed_code: 0.,
            volumes: HashMap::new(),
        };
    }

    pub fn volume(&self, attribute: &str) -> f64 {
        match self.volumes.get(attribute) {
            Some(vol) => *vol,
            None => 0.,
        }
    }

    pub fn set_volume(&mut self, attribute: &str, volume: f64) {
        self.volumes.insert(String::from(attribute), volume);
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct TransitSegment {
    pub i_node: u32,
    pub j_node: u32,
    pub transit_time_func: u32,
    // minutes per km on top of auto time
    pub speed_factor: f64,
    pub dwell_time: f64,
    // expected extra wait caused by headway deviation
    pub wait_time_dev: f64,
    // scheduled in-vehicle minutes
    pub base_time: f64,
    // passengers of all classes, written by every transit assignment
    pub transit_volume: f64,
    // per-class results, e.g. "@transit_work_vol"
    pub volumes: HashMap<String, f64>,
}

impl TransitSegment {
    pub fn new(i_node: u32, j_node: u32, transit_time_func: u32, speed_factor: f64,
               dwell_time: f64) -> TransitSegment {
        return TransitSegment {
            i_node,
            j_node,
            transit_time_func,
            speed_factor,
            dwell_time,
            wait_time_dev: 0.,
            base_time: 0.,
            transit_volume: 0.,
            volumes: HashMap::new(),
        };
    }

    pub fn volume(&self, attribute: &str) -> f64 {
        match self.volumes.get(attribute) {
            Some(vol) => *vol,
            None => 0.,
        }
    }

    pub fn set_volume(&mut self, attribute: &str, volume: f64) {
        self.volumes.insert(String::from(attribute), volume);
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct TransitLine {
    pub id: String,
    pub mode: char,
    // minutes between departures
    pub headway: f64,
    pub boarding_penalty: f64,
    pub segments: Vec<TransitSegment>,
}

impl TransitLine {
    pub fn new(id: &str, mode: char, headway: f64, segments: Vec<TransitSegment>) -> TransitLine {
        return TransitLine {
            id: String::from(id),
            mode,
            headway,
            boarding_penalty: 0.,
            segments,
        };
    }
}


#[derive(Debug, Clone)]
pub struct Network {
    nodes: BTreeMap<u32, Node>,
    links: DiGraphMap<u32, Link>,
    transit_lines: Vec<TransitLine>,
}

impl Network {
    pub fn new() -> Network {
        return Network {
            nodes: BTreeMap::new(),
            links: DiGraphMap::new(),
            transit_lines: vec![],
        };
    }

    pub fn add_node(&mut self, node: Node) {
        self.links.add_node(node.number);
        self.nodes.insert(node.number, node);
    }

    pub fn add_link(&mut self, i_node: u32, j_node: u32, link: Link)
                    -> Result<(), AssignmentError> {
        for number in &[i_node, j_node] {
            if !self.nodes.contains_key(number) {
                return Err(AssignmentError::InvalidInput(
                    format!("link {}-{} refers to missing node {}", i_node, j_node, number)));
            }
        }
        self.links.add_edge(i_node, j_node, link);
        return Ok(());
    }

    pub fn add_transit_line(&mut self, line: TransitLine) -> Result<(), AssignmentError> {
        for segment in &line.segments {
            if !self.links.contains_edge(segment.i_node, segment.j_node) {
                return Err(AssignmentError::InvalidInput(
                    format!("line {} runs on missing link {}-{}", line.id, segment.i_node,
                            segment.j_node)));
            }
        }
        self.transit_lines.push(line);
        return Ok(());
    }

    pub fn node(&self, number: u32) -> Option<&Node> {
        self.nodes.get(&number)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Zone centroids, ordered by zone number.
    pub fn centroids(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|nn| nn.is_centroid)
    }

    pub fn zone_numbers(&self) -> Vec<u32> {
        self.centroids().map(|nn| nn.number).collect()
    }

    pub fn link(&self, i_node: u32, j_node: u32) -> Option<&Link> {
        self.links.edge_weight(i_node, j_node)
    }

    pub fn link_mut(&mut self, i_node: u32, j_node: u32) -> Option<&mut Link> {
        self.links.edge_weight_mut(i_node, j_node)
    }

    pub fn links(&self) -> impl Iterator<Item = (u32, u32, &Link)> {
        self.links.all_edges()
    }

    pub fn links_mut(&mut self) -> impl Iterator<Item = (u32, u32, &mut Link)> {
        self.links.all_edges_mut()
    }

    pub fn transit_lines(&self) -> &Vec<TransitLine> {
        &self.transit_lines
    }

    pub fn transit_lines_mut(&mut self) -> &mut Vec<TransitLine> {
        &mut self.transit_lines
    }

    /// Gives mutable access to the transit lines while the links stay readable.
    pub fn lines_and_links_mut(&mut self) -> (&mut Vec<TransitLine>, &DiGraphMap<u32, Link>) {
        (&mut self.transit_lines, &self.links)
    }

    pub fn node_mut(&mut self, number: u32) -> Option<&mut Node> {
        self.nodes.get_mut(&number)
    }

    /// Every distinct fare zone label found on the network nodes, in sorted order.
    pub fn fare_zone_labels(&self) -> BTreeSet<String> {
        self.nodes.values().map(|nn| nn.label.clone()).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new(1, "A", true));
        network.add_node(Node::new(2, "B", true));
        network.add_node(Node::new(100, "A", false));
        network.add_link(1, 100, Link::new(1.0, 1)).unwrap();
        network.add_link(100, 2, Link::new(2.0, 6)).unwrap();
        network
    }

    #[test]
    fn test_add_link_needs_both_nodes() {
        let mut network = two_node_network();
        assert!(network.add_link(1, 5, Link::new(1.0, 1)).is_err());
        assert!(network.link(1, 100).is_some());
        assert!(network.link(100, 1).is_none());
    }

    #[test]
    fn test_transit_line_needs_links() {
        let mut network = two_node_network();
        let bad = TransitLine::new("1001", 'b', 10., vec![TransitSegment::new(2, 1, 1, 0., 0.)]);
        assert!(network.add_transit_line(bad).is_err());
        let good = TransitLine::new("1002", 'b', 10.,
                                    vec![TransitSegment::new(1, 100, 1, 0., 0.),
                                         TransitSegment::new(100, 2, 1, 0., 0.)]);
        assert!(network.add_transit_line(good).is_ok());
        assert_eq!(network.transit_lines().len(), 1);
    }

    #[test]
    fn test_centroids_and_labels() {
        let network = two_node_network();
        assert_eq!(network.zone_numbers(), vec![1, 2]);
        let labels: Vec<String> = network.fare_zone_labels().into_iter().collect();
        assert_eq!(labels, vec![String::from("A"), String::from("B")]);
    }

    #[test]
    fn test_link_volumes_default_to_zero() {
        let mut network = two_node_network();
        let link = network.link_mut(1, 100).unwrap();
        assert_eq!(link.volume("@truck"), 0.);
        link.set_volume("@truck", 12.5);
        assert_eq!(network.link(1, 100).unwrap().volume("@truck"), 12.5);
    }
}
