use voicelink::utils;

fn main() {
    let inputs = utils::device::get_available_inputs();
    println!("Available inputs:\n{}", inputs);

    let outputs = utils::device::get_available_outputs();
    println!("Available outputs:\n{}", outputs);
}
